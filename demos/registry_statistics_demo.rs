#![allow(clippy::uninlined_format_args, clippy::print_stdout)]
//! Observing registry statistics across misses, hits and failures.
//!
//! Run with `cargo run --example registry_statistics_demo`.

use svcreg::{BoxedError, ServiceRegistry};

#[derive(Debug)]
struct DatabasePool {
    connection_string: String,
}

#[derive(Debug)]
struct CacheService {
    size: usize,
}

#[derive(Debug)]
struct FlakyUpstream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("registry statistics demo\n");

    let registry = ServiceRegistry::new();

    println!("1. register three services");
    registry.register_named("db", || {
        println!("   -> constructing the database pool");
        Ok(DatabasePool {
            connection_string: "postgresql://localhost:5432/demo".to_string(),
        })
    })?;
    registry.register_named("cache", || {
        println!("   -> constructing the cache");
        Ok(CacheService { size: 1024 })
    })?;
    registry.register(|| {
        println!("   -> dialing the flaky upstream");
        Err::<FlakyUpstream, BoxedError>("upstream handshake failed".into())
    })?;

    let initial = registry.stats();
    println!(
        "   registered: {}, named: {}, resolutions: {}\n",
        initial.registered_services, initial.named_services, initial.total_resolutions
    );

    println!("2. the first resolve of a key is a miss");
    let db = registry.resolve::<DatabasePool>().await?;
    println!("   connected to {}", db.connection_string);
    let stats = registry.stats();
    println!(
        "   resolutions={}, hits={}, misses={}\n",
        stats.total_resolutions, stats.cache_hits, stats.cache_misses
    );

    println!("3. every later resolve of that key is a hit");
    for _ in 0..5 {
        let _ = registry.resolve::<DatabasePool>().await?;
    }
    let stats = registry.stats();
    println!(
        "   resolutions={}, hits={}, misses={}, hit rate={:.1}%\n",
        stats.total_resolutions,
        stats.cache_hits,
        stats.cache_misses,
        stats.hit_rate() * 100.0
    );

    println!("4. other keys miss once and then hit");
    let cache = registry.resolve::<CacheService>().await?;
    println!("   cache holds {} entries", cache.size);
    let _ = registry.resolve::<CacheService>().await?;
    let stats = registry.stats();
    println!(
        "   resolutions={}, hits={}, misses={}\n",
        stats.total_resolutions, stats.cache_hits, stats.cache_misses
    );

    println!("5. failures count once as a construction failure, then as replays");
    for attempt in 1..=3 {
        if let Err(error) = registry.resolve::<FlakyUpstream>().await {
            println!(
                "   attempt {}: {} (cached: {})",
                attempt,
                error,
                error.is_cached_failure()
            );
        }
    }
    let stats = registry.stats();
    println!(
        "   construction failures={}, failure replays={}\n",
        stats.construction_failures, stats.failure_replays
    );

    println!("6. final snapshot");
    let final_stats = registry.stats();
    println!("   total resolutions:     {}", final_stats.total_resolutions);
    println!("   cache hits:            {}", final_stats.cache_hits);
    println!("   cache misses:          {}", final_stats.cache_misses);
    println!(
        "   construction failures: {}",
        final_stats.construction_failures
    );
    println!("   failure replays:       {}", final_stats.failure_replays);
    println!(
        "   registered services:   {}",
        final_stats.registered_services
    );
    println!("   named services:        {}", final_stats.named_services);
    println!("   resolved services:     {}", final_stats.resolved_services);
    println!("   failed services:       {}", final_stats.failed_services);
    println!(
        "   hit rate:              {:.1}%",
        final_stats.hit_rate() * 100.0
    );
    println!("\n   {}", final_stats.summary());

    Ok(())
}
