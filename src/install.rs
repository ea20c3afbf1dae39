//! Startup registration of service sets.

use tracing::debug;

use crate::error::RegistryError;
use crate::registry::ServiceRegistry;

/// A set of related services registered together at startup.
///
/// Installers keep registration explicit: an application lists the installers
/// it wants and runs them against a registry it owns, rather than relying on
/// any global discovery mechanism.
pub trait ServiceInstaller: Send + Sync {
    /// Short name, used in logs.
    fn name(&self) -> &str;

    /// Registers this set's factories into `registry`.
    fn install(&self, registry: &ServiceRegistry) -> Result<(), RegistryError>;
}

impl ServiceRegistry {
    /// Runs one installer against this registry.
    pub fn install(&self, installer: &dyn ServiceInstaller) -> Result<(), RegistryError> {
        debug!(installer = installer.name(), "installing service set");
        installer.install(self)
    }

    /// Runs installers in order; the first error aborts the rest.
    pub fn install_all<'a, I>(&self, installers: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = &'a dyn ServiceInstaller>,
    {
        for installer in installers {
            self.install(installer)?;
        }
        Ok(())
    }
}
