#![allow(clippy::uninlined_format_args, clippy::print_stdout)]
//! Walkthrough of registration, resolution, aliases and failure replay.
//!
//! Run with `cargo run --example simple_registry_usage`.

use std::sync::Arc;

use svcreg::{CandidateFactory, ServiceRegistry};

#[derive(Debug)]
struct AppConfig {
    name: String,
    environment: String,
}

#[derive(Debug)]
struct AuditLog {
    prefix: String,
}

impl AuditLog {
    fn record(&self, message: &str) {
        println!("[{}] {}", self.prefix, message);
    }
}

#[derive(Debug)]
struct SearchIndex {
    shards: u32,
}

#[derive(Debug)]
struct MetricsSink;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("service registry walkthrough\n");

    let registry = ServiceRegistry::new();

    println!("1. register services (factories only, nothing is constructed yet)");
    registry.register_named("config", || {
        println!("   -> constructing AppConfig");
        Ok(AppConfig {
            name: "svcreg-demo".to_string(),
            environment: "staging".to_string(),
        })
    })?;
    registry.register(|| {
        println!("   -> constructing AuditLog");
        Ok(AuditLog {
            prefix: "audit".to_string(),
        })
    })?;
    println!(
        "   registered {} services, resolved so far: {}\n",
        registry.len(),
        registry.stats().resolved_services
    );

    println!("2. the first resolution runs the factory");
    let config = registry.resolve::<AppConfig>().await?;
    println!("   config: {} ({})\n", config.name, config.environment);

    println!("3. later resolutions replay the same instance");
    let again = registry.resolve::<AppConfig>().await?;
    println!("   same instance: {}\n", Arc::ptr_eq(&config, &again));

    println!("4. names resolve to the same memoized instance");
    let by_name = registry.resolve_by_name_as::<AppConfig>("config").await?;
    println!(
        "   via \"config\": {}, same instance: {}",
        by_name.name,
        Arc::ptr_eq(&config, &by_name)
    );
    println!("   name of AppConfig: {}\n", registry.name_of::<AppConfig>()?);

    let log = registry.resolve::<AuditLog>().await?;
    log.record("registry warmed up");

    println!("\n5. candidate chains try fallbacks in order");
    let chain = CandidateFactory::<SearchIndex>::new()
        .candidate("remote", || Err("remote index unreachable".into()))
        .candidate("local", || {
            println!("   -> building the local index");
            Ok(SearchIndex { shards: 4 })
        });
    registry.register_factory(Some("search".to_string()), chain)?;
    let index = registry.resolve::<SearchIndex>().await?;
    println!("   search index ready with {} shards\n", index.shards);

    println!("6. failures are memoized and replayed");
    registry.register(|| {
        println!("   -> trying to reach the metrics sink");
        Err::<MetricsSink, _>("metrics endpoint refused the connection".into())
    })?;
    match registry.resolve::<MetricsSink>().await {
        Ok(_) => println!("   unexpectedly succeeded"),
        Err(error) => println!("   first attempt:  {}", error),
    }
    match registry.resolve::<MetricsSink>().await {
        Ok(_) => println!("   unexpectedly succeeded"),
        Err(error) => println!(
            "   second attempt: {} (cached: {})",
            error,
            error.is_cached_failure()
        ),
    }

    println!("\n7. statistics");
    println!("   {}", registry.stats().summary());

    Ok(())
}
