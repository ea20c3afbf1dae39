//! Error types for the service registry.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::key::ServiceKey;

/// Boxed error type accepted from service factories.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Memoized record of a failed construction.
///
/// The first failed factory invocation for a key produces one record; every
/// later resolve of that key replays a clone of the same record, so the
/// underlying cause is one shared allocation rather than a fresh error per
/// attempt.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    key: ServiceKey,
    cause: Arc<dyn StdError + Send + Sync>,
}

impl FailureRecord {
    pub(crate) fn new(key: ServiceKey, cause: BoxedError) -> Self {
        Self {
            key,
            cause: Arc::from(cause),
        }
    }

    /// Key of the service whose construction failed.
    pub fn service_key(&self) -> ServiceKey {
        self.key
    }

    /// Name of the service type whose construction failed.
    pub fn type_name(&self) -> &'static str {
        self.key.type_name()
    }

    /// The original factory error.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// True when both records share the same cause allocation, which is the
    /// case exactly when they stem from the same factory invocation.
    pub fn shares_cause(&self, other: &FailureRecord) -> bool {
        Arc::ptr_eq(&self.cause, &other.cause)
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl StdError for FailureRecord {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let cause: &(dyn StdError + 'static) = self.cause.as_ref();
        Some(cause)
    }
}

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No factory is registered for the requested type, or the type has no
    /// registered name.
    #[error("service type '{type_name}' is not registered")]
    ServiceNotRegistered {
        /// Name of the requested type.
        type_name: &'static str,
    },

    /// No service is registered under the requested name.
    #[error("no service is registered under the name '{name}'")]
    NameNotRegistered {
        /// Name used for the lookup.
        name: String,
    },

    /// The factory for this service just failed; the failure is memoized
    /// from now on.
    #[error("failed to construct service '{}': {}", .source.type_name(), .source)]
    ConstructionFailed {
        /// Record shared with all later replays.
        #[source]
        source: FailureRecord,
    },

    /// An earlier construction attempt failed; the memoized failure is
    /// replayed without invoking the factory again.
    #[error("service '{}' previously failed to construct: {}", .source.type_name(), .source)]
    CachedConstructionFailed {
        /// Record memoized by the first failed attempt.
        #[source]
        source: FailureRecord,
    },

    /// A resolved instance was not of the requested type.
    #[error("type mismatch: expected '{expected}', found '{actual}'")]
    TypeMismatch {
        /// Type the caller asked for.
        expected: &'static str,
        /// Type actually registered.
        actual: &'static str,
    },

    /// A factory is already registered for this type. Only raised under
    /// [`RebindPolicy::Reject`](crate::config::RebindPolicy::Reject).
    #[error("a factory is already registered for service type '{type_name}'")]
    DuplicateRegistration {
        /// Name of the already-registered type.
        type_name: &'static str,
    },

    /// The name is already bound to a different type. Only raised under
    /// [`RebindPolicy::Reject`](crate::config::RebindPolicy::Reject).
    #[error("name '{name}' is already bound to service type '{existing}'")]
    DuplicateName {
        /// Name that was requested.
        name: String,
        /// Type the name is currently bound to.
        existing: &'static str,
    },
}

impl RegistryError {
    /// The memoized failure record, when this error carries one.
    pub fn failure_record(&self) -> Option<&FailureRecord> {
        match self {
            RegistryError::ConstructionFailed { source }
            | RegistryError::CachedConstructionFailed { source } => Some(source),
            _ => None,
        }
    }

    /// True when this error replays a previously memoized failure rather
    /// than reporting a fresh one.
    pub fn is_cached_failure(&self) -> bool {
        matches!(self, RegistryError::CachedConstructionFailed { .. })
    }
}

/// Errors produced while loading a registry configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{}'", .path.display())]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration text was not a valid registry config.
    #[error("invalid registry config: {0}")]
    Parse(#[from] toml::de::Error),
}
