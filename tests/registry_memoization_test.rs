//! Memoization and concurrency behavior.
//!
//! The registry invokes each factory at most once, memoizes the outcome
//! (instance or failure) permanently, and keeps keys independent of one
//! another. These tests drive those invariants under sequential and
//! concurrent use and check the resolution statistics along the way.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use tokio::time::sleep;

use svcreg::{BoxedError, RegistryError, ServiceRegistry};

#[derive(Debug)]
struct Telemetry {
    id: i32,
}

#[derive(Debug)]
struct DatabasePool;

struct HitCounter {
    hits: AtomicUsize,
}

impl HitCounter {
    fn record(&self) -> usize {
        self.hits.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug)]
struct SlowService {
    ready: bool,
}

#[async_trait::async_trait]
trait Repository: Send + Sync {
    async fn fetch(&self, id: u32) -> String;
}

struct PostgresRepository {
    dsn: String,
}

#[async_trait::async_trait]
impl Repository for PostgresRepository {
    async fn fetch(&self, id: u32) -> String {
        sleep(Duration::from_millis(5)).await;
        format!("{}#{}", self.dsn, id)
    }
}

#[tokio::test]
async fn test_factory_runs_once_under_concurrent_resolves() {
    let registry = ServiceRegistry::new();
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();

    registry
        .register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Telemetry { id: 42 })
        })
        .expect("register");

    let mut handles = vec![];
    for _ in 0..50 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.resolve::<Telemetry>().await.expect("resolve")
        }));
    }

    let instances = future::join_all(handles).await;
    let first = instances[0].as_ref().expect("join");
    for instance in &instances {
        let instance = instance.as_ref().expect("join");
        assert_eq!(instance.id, 42);
        assert!(Arc::ptr_eq(first, instance));
    }

    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failures_are_memoized() {
    let registry = ServiceRegistry::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    registry
        .register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Telemetry, BoxedError>(Box::new(io::Error::other("sink offline")))
        })
        .expect("register");

    let first = registry.resolve::<Telemetry>().await.unwrap_err();
    assert!(matches!(first, RegistryError::ConstructionFailed { .. }));

    let second = registry.resolve::<Telemetry>().await.unwrap_err();
    assert!(matches!(
        second,
        RegistryError::CachedConstructionFailed { .. }
    ));
    assert!(first
        .failure_record()
        .expect("first record")
        .shares_cause(second.failure_record().expect("second record")));

    // The factory never ran again.
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_failures_share_one_record() {
    let registry = ServiceRegistry::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    registry
        .register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Telemetry, BoxedError>(Box::new(io::Error::other("sink offline")))
        })
        .expect("register");

    let mut handles = vec![];
    for _ in 0..20 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.resolve::<Telemetry>().await.unwrap_err()
        }));
    }
    let errors: Vec<RegistryError> = future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("join"))
        .collect();

    // Exactly one caller observed the fresh failure; the rest replayed it.
    let fresh = errors.iter().filter(|e| !e.is_cached_failure()).count();
    assert_eq!(fresh, 1);

    let reference = errors[0].failure_record().expect("record");
    for error in &errors {
        assert!(reference.shares_cause(error.failure_record().expect("record")));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_a_memoized_failure_outlives_re_registration() {
    let registry = ServiceRegistry::new();
    registry
        .register(|| Err::<Telemetry, BoxedError>(Box::new(io::Error::other("sink offline"))))
        .expect("register");

    let first = registry.resolve::<Telemetry>().await.unwrap_err();

    // A working factory arrives too late: the first outcome is permanent.
    registry
        .register(|| Ok(Telemetry { id: 7 }))
        .expect("late registration is ignored");
    let second = registry.resolve::<Telemetry>().await.unwrap_err();
    assert!(second.is_cached_failure());
    assert!(first
        .failure_record()
        .expect("record")
        .shares_cause(second.failure_record().expect("record")));
}

#[tokio::test]
async fn test_keys_fail_independently() {
    let registry = ServiceRegistry::new();
    let cache_constructions = Arc::new(AtomicUsize::new(0));
    let counter = cache_constructions.clone();

    registry
        .register(|| Err::<DatabasePool, BoxedError>(Box::new(io::Error::other("db down"))))
        .expect("register db");
    registry
        .register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HitCounter {
                hits: AtomicUsize::new(0),
            })
        })
        .expect("register cache");

    assert!(registry.resolve::<DatabasePool>().await.is_err());
    let cache = registry
        .resolve::<HitCounter>()
        .await
        .expect("cache resolves");
    assert!(registry.resolve::<DatabasePool>().await.is_err());

    // The failing neighbor never triggered extra cache constructions.
    assert_eq!(cache.hits.load(Ordering::SeqCst), 0);
    assert_eq!(cache_constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_idempotent_re_resolution() {
    let registry = ServiceRegistry::new();
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();

    registry
        .register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Telemetry { id: 9 })
        })
        .expect("register");

    let first = registry.resolve::<Telemetry>().await.expect("first");
    let second = registry.resolve::<Telemetry>().await.expect("second");
    let third = registry.resolve::<Telemetry>().await.expect("third");

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_caller_waits_for_the_first_resolution() {
    let registry = ServiceRegistry::new();
    let invocations = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(AtomicBool::new(false));

    let invocations_in_factory = invocations.clone();
    let started_in_factory = started.clone();
    registry
        .register(move || {
            invocations_in_factory.fetch_add(1, Ordering::SeqCst);
            started_in_factory.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            Ok(SlowService { ready: true })
        })
        .expect("register");

    let first = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.resolve::<SlowService>().await })
    };

    // Enter the race only once the first caller is inside the factory.
    while !started.load(Ordering::SeqCst) {
        sleep(Duration::from_millis(5)).await;
    }
    let second = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.resolve::<SlowService>().await })
    };

    let a = first.await.expect("join").expect("first resolve");
    let b = second.await.expect("join").expect("second resolve");

    assert!(a.ready);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_database_and_cache_scenario() {
    let registry = ServiceRegistry::new();
    let db_invocations = Arc::new(AtomicUsize::new(0));
    let db_counter = db_invocations.clone();

    registry
        .register_named("db", move || {
            db_counter.fetch_add(1, Ordering::SeqCst);
            Err::<DatabasePool, BoxedError>(Box::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused: 10.0.0.12:5432",
            )))
        })
        .expect("register db");
    registry
        .register_named("cache", || {
            Ok(HitCounter {
                hits: AtomicUsize::new(0),
            })
        })
        .expect("register cache");

    // The cache comes up even though the database is down.
    let cache = registry.resolve::<HitCounter>().await.expect("cache");
    assert_eq!(cache.record(), 1);

    // The first database resolve runs the factory and memoizes the failure.
    let first = registry.resolve::<DatabasePool>().await.unwrap_err();
    assert!(!first.is_cached_failure());
    let cause = first
        .failure_record()
        .expect("record")
        .cause()
        .downcast_ref::<io::Error>()
        .expect("io cause");
    assert_eq!(cause.kind(), io::ErrorKind::ConnectionRefused);

    // Later attempts replay the identical cause without a new invocation,
    // on the typed path and the name path alike.
    let second = registry.resolve::<DatabasePool>().await.unwrap_err();
    assert!(second.is_cached_failure());
    let by_name = match registry.resolve_by_name("db").await {
        Ok(_) => panic!("the database construction should have failed"),
        Err(error) => error,
    };
    assert!(by_name.is_cached_failure());

    let original = first.failure_record().expect("record");
    assert!(original.shares_cause(second.failure_record().expect("record")));
    assert!(original.shares_cause(by_name.failure_record().expect("record")));
    assert_eq!(db_invocations.load(Ordering::SeqCst), 1);

    // The cache instance and its state survive untouched.
    let cache_again = registry.resolve::<HitCounter>().await.expect("cache again");
    assert!(Arc::ptr_eq(&cache, &cache_again));
    assert_eq!(cache_again.record(), 2);
}

#[tokio::test]
async fn test_resolved_services_work_through_trait_objects() {
    let registry = ServiceRegistry::new();
    registry
        .register(|| {
            Ok(PostgresRepository {
                dsn: "postgres://main".to_string(),
            })
        })
        .expect("register");

    let repo = registry
        .resolve::<PostgresRepository>()
        .await
        .expect("resolve");
    let as_trait: &dyn Repository = repo.as_ref();
    assert_eq!(as_trait.fetch(7).await, "postgres://main#7");
}

#[tokio::test]
async fn test_stats_track_hits_misses_and_failures() {
    let registry = ServiceRegistry::new();

    let initial = registry.stats();
    assert_eq!(initial.total_resolutions, 0);
    assert_eq!(initial.hit_rate(), 0.0);

    registry
        .register(|| Err::<DatabasePool, BoxedError>(Box::new(io::Error::other("db down"))))
        .expect("register db");
    registry
        .register_named("cache", || {
            Ok(HitCounter {
                hits: AtomicUsize::new(0),
            })
        })
        .expect("register cache");

    for _ in 0..3 {
        let _ = registry.resolve::<HitCounter>().await.expect("cache");
    }
    let _ = registry.resolve::<DatabasePool>().await.unwrap_err();
    let _ = registry.resolve::<DatabasePool>().await.unwrap_err();
    let _ = registry.resolve::<Telemetry>().await.unwrap_err();

    let stats = registry.stats();
    assert_eq!(stats.total_resolutions, 6);
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.construction_failures, 1);
    assert_eq!(stats.failure_replays, 1);
    assert_eq!(stats.registered_services, 2);
    assert_eq!(stats.named_services, 1);
    assert_eq!(stats.resolved_services, 1);
    assert_eq!(stats.failed_services, 1);
    assert!((stats.hit_rate() - 0.6).abs() < 1e-9);
    assert!(stats.summary().contains("resolutions: 6"));
}

#[tokio::test]
async fn test_mixed_keys_under_load() {
    let registry = ServiceRegistry::new();
    let db_attempts = Arc::new(AtomicUsize::new(0));
    let cache_constructions = Arc::new(AtomicUsize::new(0));

    {
        let db_attempts = db_attempts.clone();
        registry
            .register(move || {
                db_attempts.fetch_add(1, Ordering::SeqCst);
                Err::<DatabasePool, BoxedError>(Box::new(io::Error::other("db down")))
            })
            .expect("register db");
    }
    {
        let cache_constructions = cache_constructions.clone();
        registry
            .register(move || {
                cache_constructions.fetch_add(1, Ordering::SeqCst);
                Ok(HitCounter {
                    hits: AtomicUsize::new(0),
                })
            })
            .expect("register cache");
    }

    let mut handles = vec![];
    for _ in 0..100 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let cache = registry.resolve::<HitCounter>().await.expect("cache");
            let db = registry.resolve::<DatabasePool>().await.unwrap_err();
            (cache, db)
        }));
    }

    for joined in future::join_all(handles).await {
        let (cache, db) = joined.expect("join");
        assert_eq!(cache.hits.load(Ordering::SeqCst), 0);
        assert!(db.failure_record().is_some());
    }

    assert_eq!(db_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(cache_constructions.load(Ordering::SeqCst), 1);

    let stats = registry.stats();
    assert_eq!(stats.total_resolutions, 200);
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.cache_hits, 198);
    assert!(stats.hit_rate() > 0.98);
}
