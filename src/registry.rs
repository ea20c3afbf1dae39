//! The keyed lazy service registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{RebindPolicy, RegistryConfig};
use crate::error::{BoxedError, FailureRecord, RegistryError};
use crate::factory::{FnServiceFactory, ServiceFactory};
use crate::key::ServiceKey;
use crate::stats::{RegistryStats, StatsRecorder};

/// Outcome memoized for a key by its first resolution.
type Resolution = Result<Arc<dyn Any + Send + Sync>, FailureRecord>;

struct RegisteredFactory {
    key: ServiceKey,
    factory: Arc<dyn ServiceFactory>,
}

#[derive(Default)]
struct AliasTable {
    by_name: HashMap<String, ServiceKey>,
    by_key: HashMap<TypeId, String>,
}

struct RegistryInner {
    factories: DashMap<TypeId, RegisteredFactory>,
    resolutions: DashMap<TypeId, Arc<OnceCell<Resolution>>>,
    aliases: RwLock<AliasTable>,
    stats: StatsRecorder,
    config: RegistryConfig,
}

/// Keyed lazy service registry.
///
/// Holds factories keyed by service type, constructs each instance on first
/// resolve, and memoizes the outcome, success or failure, for the registry's
/// whole lifetime: a constructed instance is shared by every later resolve,
/// and a failed construction replays the same failure without running the
/// factory again. Handles are cheap to clone and share one underlying
/// registry.
///
/// # Examples
///
/// ```
/// use svcreg::ServiceRegistry;
///
/// #[derive(Debug)]
/// struct Greeter {
///     greeting: String,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), svcreg::RegistryError> {
/// let registry = ServiceRegistry::new();
/// registry.register(|| Ok(Greeter { greeting: "hello".into() }))?;
///
/// let greeter = registry.resolve::<Greeter>().await?;
/// assert_eq!(greeter.greeting, "hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// Creates an empty registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Creates an empty registry configured by `config`.
    pub fn with_config(config: RegistryConfig) -> Self {
        let capacity = config.initial_capacity.unwrap_or(0);
        Self {
            inner: Arc::new(RegistryInner {
                factories: DashMap::with_capacity(capacity),
                resolutions: DashMap::with_capacity(capacity),
                aliases: RwLock::new(AliasTable::default()),
                stats: StatsRecorder::default(),
                config,
            }),
        }
    }

    /// Registers a closure factory for `T`, without a name.
    ///
    /// Nothing is constructed here; the closure runs at most once, on the
    /// first resolve of `T`. See [`RebindPolicy`] for the behavior when `T`
    /// is already registered.
    pub fn register<T, F>(&self, factory: F) -> Result<(), RegistryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Result<T, BoxedError> + Send + Sync + 'static,
    {
        self.register_factory(None, FnServiceFactory::new(factory))
    }

    /// Registers a closure factory for `T` under `name`.
    pub fn register_named<T, F>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Result<T, BoxedError> + Send + Sync + 'static,
    {
        self.register_factory(Some(name.into()), FnServiceFactory::new(factory))
    }

    /// Registers any [`ServiceFactory`], optionally bound to a name.
    ///
    /// Passing `None` leaves an existing name binding for the key untouched.
    /// Once the key has a memoized resolution, registrations for it are
    /// ignored under [`RebindPolicy::Replace`]: the first resolution outcome
    /// is permanent.
    pub fn register_factory(
        &self,
        name: Option<String>,
        factory: impl ServiceFactory + 'static,
    ) -> Result<(), RegistryError> {
        let key = factory.service_key();

        if self.inner.config.rebind == RebindPolicy::Reject
            && self.inner.factories.contains_key(&key.id())
        {
            return Err(RegistryError::DuplicateRegistration {
                type_name: key.type_name(),
            });
        }

        if self.is_resolved(key) {
            warn!(service = %key, "registration ignored: key already has a memoized resolution");
            return Ok(());
        }

        // Bind the name first so a rejected name leaves no half-registration.
        if let Some(name) = name {
            self.bind_name(name, key)?;
        }

        let replaced = self
            .inner
            .factories
            .insert(
                key.id(),
                RegisteredFactory {
                    key,
                    factory: Arc::new(factory),
                },
            )
            .is_some();
        if replaced {
            debug!(service = %key, "replaced previously registered factory");
        } else {
            debug!(service = %key, "registered service factory");
        }
        Ok(())
    }

    /// Resolves the instance for `T`, constructing it on first use.
    ///
    /// The first caller for a key runs its factory; a concurrent caller for
    /// the same key waits for that resolution and then observes the
    /// identical outcome. Once a factory has failed, every later resolve of
    /// the key returns [`RegistryError::CachedConstructionFailed`] with the
    /// original cause; other keys are unaffected. The factory call happens
    /// within a single poll of the per-key initialization, so a caller
    /// cancelled mid-resolve cannot cause a second invocation.
    pub async fn resolve<T>(&self) -> Result<Arc<T>, RegistryError>
    where
        T: Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        let instance = self.resolve_erased(key).await?;
        instance
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                expected: key.type_name(),
                actual: "unknown type",
            })
    }

    /// Resolves by registered name, returning the type-erased instance.
    ///
    /// Callers that know the concrete type should prefer
    /// [`resolve_by_name_as`](Self::resolve_by_name_as).
    pub async fn resolve_by_name(
        &self,
        name: &str,
    ) -> Result<Arc<dyn Any + Send + Sync>, RegistryError> {
        let key = self
            .key_named(name)
            .ok_or_else(|| RegistryError::NameNotRegistered {
                name: name.to_string(),
            })?;
        self.resolve_erased(key).await
    }

    /// Resolves by registered name and downcasts the instance to `T`.
    pub async fn resolve_by_name_as<T>(&self, name: &str) -> Result<Arc<T>, RegistryError>
    where
        T: Send + Sync + 'static,
    {
        let key = self
            .key_named(name)
            .ok_or_else(|| RegistryError::NameNotRegistered {
                name: name.to_string(),
            })?;
        let instance = self.resolve_erased(key).await?;
        instance
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: key.type_name(),
            })
    }

    /// The name `T` was registered under.
    ///
    /// Fails with [`RegistryError::ServiceNotRegistered`] when `T` has no
    /// registered name, whether or not a factory for `T` exists.
    pub fn name_of<T: 'static>(&self) -> Result<String, RegistryError> {
        self.inner
            .aliases
            .read()
            .by_key
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(RegistryError::ServiceNotRegistered {
                type_name: std::any::type_name::<T>(),
            })
    }

    /// The key registered under `name`, if any.
    pub fn key_named(&self, name: &str) -> Option<ServiceKey> {
        self.inner.aliases.read().by_name.get(name).copied()
    }

    /// True when a factory for `T` is registered.
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.inner.factories.contains_key(&TypeId::of::<T>())
    }

    /// Keys of all registered factories, in no particular order.
    pub fn registered_keys(&self) -> Vec<ServiceKey> {
        self.inner
            .factories
            .iter()
            .map(|entry| entry.value().key)
            .collect()
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.inner.factories.len()
    }

    /// True when no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.factories.is_empty()
    }

    /// Snapshot of the resolution counters and table sizes.
    pub fn stats(&self) -> RegistryStats {
        let mut resolved = 0;
        let mut failed = 0;
        for entry in self.inner.resolutions.iter() {
            match entry.value().get() {
                Some(Ok(_)) => resolved += 1,
                Some(Err(_)) => failed += 1,
                None => {}
            }
        }
        self.inner.stats.snapshot(
            self.inner.factories.len(),
            self.inner.aliases.read().by_name.len(),
            resolved,
            failed,
        )
    }

    async fn resolve_erased(
        &self,
        key: ServiceKey,
    ) -> Result<Arc<dyn Any + Send + Sync>, RegistryError> {
        self.inner.stats.record_resolution();

        // Fast path: the key already holds a memoized outcome.
        let existing = self
            .inner
            .resolutions
            .get(&key.id())
            .map(|entry| Arc::clone(entry.value()));
        if let Some(cell) = existing {
            if let Some(outcome) = cell.get() {
                return self.replay(outcome);
            }
        }

        // Unknown keys never allocate a resolution cell, so a later
        // registration still resolves cleanly.
        if !self.inner.factories.contains_key(&key.id()) {
            return Err(RegistryError::ServiceNotRegistered {
                type_name: key.type_name(),
            });
        }

        let cell = self
            .inner
            .resolutions
            .entry(key.id())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let invoked = AtomicBool::new(false);
        let outcome = cell
            .get_or_try_init(|| {
                invoked.store(true, Ordering::Relaxed);
                async {
                    let factory = {
                        match self.inner.factories.get(&key.id()) {
                            Some(entry) => Arc::clone(&entry.value().factory),
                            None => {
                                return Err(RegistryError::ServiceNotRegistered {
                                    type_name: key.type_name(),
                                })
                            }
                        }
                    };
                    // No await between the factory call and memoization: the
                    // whole construction completes in one poll, so a dropped
                    // caller cannot leave a second invocation behind.
                    Ok(self.construct(key, factory.as_ref()))
                }
            })
            .await?;

        if invoked.load(Ordering::Relaxed) {
            match outcome {
                Ok(instance) => Ok(Arc::clone(instance)),
                Err(record) => Err(RegistryError::ConstructionFailed {
                    source: record.clone(),
                }),
            }
        } else {
            self.replay(outcome)
        }
    }

    /// Serves a memoized outcome without touching the factory.
    fn replay(&self, outcome: &Resolution) -> Result<Arc<dyn Any + Send + Sync>, RegistryError> {
        match outcome {
            Ok(instance) => {
                self.inner.stats.record_hit();
                Ok(Arc::clone(instance))
            }
            Err(record) => {
                self.inner.stats.record_failure_replay();
                debug!(service = %record.service_key(), "replaying memoized construction failure");
                Err(RegistryError::CachedConstructionFailed {
                    source: record.clone(),
                })
            }
        }
    }

    fn construct(&self, key: ServiceKey, factory: &dyn ServiceFactory) -> Resolution {
        debug!(service = %key, "constructing service instance");
        match factory.create() {
            Ok(instance) => {
                self.inner.stats.record_miss();
                debug!(service = %key, "service instance memoized");
                Ok(instance)
            }
            Err(cause) => {
                let record = FailureRecord::new(key, cause);
                self.inner.stats.record_construction_failure();
                warn!(service = %key, error = %record, "service construction failed; failure memoized");
                Err(record)
            }
        }
    }

    fn is_resolved(&self, key: ServiceKey) -> bool {
        self.inner
            .resolutions
            .get(&key.id())
            .map(|entry| entry.value().get().is_some())
            .unwrap_or(false)
    }

    fn bind_name(&self, name: String, key: ServiceKey) -> Result<(), RegistryError> {
        let mut aliases = self.inner.aliases.write();

        if let Some(existing) = aliases.by_name.get(&name).copied() {
            if existing == key {
                return Ok(());
            }
            if self.inner.config.rebind == RebindPolicy::Reject {
                return Err(RegistryError::DuplicateName {
                    name,
                    existing: existing.type_name(),
                });
            }
            aliases.by_key.remove(&existing.id());
            warn!(name = %name, from = %existing, to = %key, "service name rebound");
        }

        // Renaming a key drops its previous forward entry, keeping the
        // table consistent in both directions.
        if let Some(previous) = aliases.by_key.insert(key.id(), name.clone()) {
            if previous != name {
                aliases.by_name.remove(&previous);
            }
        }
        aliases.by_name.insert(name, key);
        Ok(())
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registered", &self.inner.factories.len())
            .field("resolved", &self.inner.resolutions.len())
            .finish()
    }
}
