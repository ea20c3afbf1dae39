//! Service factories.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::error::BoxedError;
use crate::key::ServiceKey;

/// A zero-argument constructor for one service type.
///
/// Factories are handed to the registry at registration time and owned by it
/// from then on. `create` runs at most once per key, inside the registry's
/// per-key critical section, so implementations may be expensive without
/// their own caching.
pub trait ServiceFactory: Send + Sync {
    /// Produces one erased instance, or fails.
    fn create(&self) -> Result<Arc<dyn Any + Send + Sync>, BoxedError>;

    /// The key this factory constructs.
    fn service_key(&self) -> ServiceKey;
}

/// Adapts a closure into a [`ServiceFactory`].
pub struct FnServiceFactory<F, T> {
    factory_fn: F,
    key: ServiceKey,
    _phantom: PhantomData<T>,
}

impl<F, T> FnServiceFactory<F, T>
where
    F: Fn() -> Result<T, BoxedError> + Send + Sync,
    T: Send + Sync + 'static,
{
    /// Wraps `factory_fn` as the factory for `T`.
    pub fn new(factory_fn: F) -> Self {
        Self {
            factory_fn,
            key: ServiceKey::of::<T>(),
            _phantom: PhantomData,
        }
    }
}

impl<F, T> ServiceFactory for FnServiceFactory<F, T>
where
    F: Fn() -> Result<T, BoxedError> + Send + Sync,
    T: Send + Sync + 'static,
{
    fn create(&self) -> Result<Arc<dyn Any + Send + Sync>, BoxedError> {
        let instance = (self.factory_fn)()?;
        Ok(Arc::new(instance))
    }

    fn service_key(&self) -> ServiceKey {
        self.key
    }
}

type CandidateFn<T> = Box<dyn Fn() -> Result<T, BoxedError> + Send + Sync>;

struct Candidate<T> {
    label: &'static str,
    produce: CandidateFn<T>,
}

/// An ordered chain of labelled constructors for one service type.
///
/// `create` tries the candidates in the order they were added and the first
/// success wins. This keeps "use the real implementation when available,
/// fall back to a stub otherwise" explicit: callers list the alternatives
/// (possibly behind `#[cfg(...)]`) instead of probing for implementations at
/// runtime.
pub struct CandidateFactory<T> {
    key: ServiceKey,
    candidates: Vec<Candidate<T>>,
}

impl<T: Send + Sync + 'static> CandidateFactory<T> {
    /// Creates an empty chain; `create` fails until a candidate is added.
    pub fn new() -> Self {
        Self {
            key: ServiceKey::of::<T>(),
            candidates: Vec::new(),
        }
    }

    /// Appends a labelled candidate. Earlier candidates are preferred.
    pub fn candidate(
        mut self,
        label: &'static str,
        produce: impl Fn() -> Result<T, BoxedError> + Send + Sync + 'static,
    ) -> Self {
        self.candidates.push(Candidate {
            label,
            produce: Box::new(produce),
        });
        self
    }

    /// Number of candidates in the chain.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// True when no candidate has been added.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl<T: Send + Sync + 'static> Default for CandidateFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> ServiceFactory for CandidateFactory<T> {
    fn create(&self) -> Result<Arc<dyn Any + Send + Sync>, BoxedError> {
        let mut last_error = None;
        for candidate in &self.candidates {
            match (candidate.produce)() {
                Ok(instance) => {
                    debug!(service = %self.key, candidate = candidate.label, "candidate selected");
                    return Ok(Arc::new(instance));
                }
                Err(error) => {
                    debug!(
                        service = %self.key,
                        candidate = candidate.label,
                        error = %error,
                        "candidate unavailable"
                    );
                    last_error = Some(error);
                }
            }
        }
        Err(Box::new(NoUsableCandidate {
            type_name: self.key.type_name(),
            tried: self.candidates.iter().map(|c| c.label).collect(),
            last_error,
        }))
    }

    fn service_key(&self) -> ServiceKey {
        self.key
    }
}

/// Raised when every candidate in a chain failed, or the chain is empty.
#[derive(Debug)]
struct NoUsableCandidate {
    type_name: &'static str,
    tried: Vec<&'static str>,
    last_error: Option<BoxedError>,
}

impl fmt::Display for NoUsableCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tried.is_empty() {
            write!(f, "no candidates registered for service '{}'", self.type_name)
        } else {
            write!(
                f,
                "no usable candidate for service '{}' (tried: {})",
                self.type_name,
                self.tried.join(", ")
            )
        }
    }
}

impl StdError for NoUsableCandidate {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.last_error {
            Some(error) => {
                let cause: &(dyn StdError + 'static) = error.as_ref();
                Some(cause)
            }
            None => None,
        }
    }
}
