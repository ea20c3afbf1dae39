//! Keyed lazy service registry.
//!
//! `svcreg` holds service factories keyed by type, constructs each service
//! lazily on first resolve, and memoizes the first outcome permanently: a
//! successful construction always returns the same shared instance, and a
//! failed one replays the same failure without running the factory again.
//! Optional string names alias registered types for name-based lookup.
//!
//! Registries are explicit values: create one, register factories (directly
//! or through [`ServiceInstaller`]s), share clones of the handle, and drop
//! the whole thing when it is no longer needed. There is no global registry
//! and no per-key eviction.

pub mod config;
pub mod error;
pub mod factory;
pub mod install;
pub mod key;
pub mod registry;
pub mod stats;

// Re-export the public surface at the crate root.
pub use config::{RebindPolicy, RegistryConfig};
pub use error::{BoxedError, ConfigError, FailureRecord, RegistryError};
pub use factory::{CandidateFactory, FnServiceFactory, ServiceFactory};
pub use install::ServiceInstaller;
pub use key::ServiceKey;
pub use registry::ServiceRegistry;
pub use stats::RegistryStats;
