//! Volume driver contract and registration.
//!
//! A driver owns the physical storage behind volumes: it allocates,
//! removes and locates backing paths. The registry above it owns the
//! metadata records and never writes below a driver's mount point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use keg_common::{KegError, KegResult};

mod bind;
mod local;

pub use bind::BindDriver;
pub use local::LocalDriver;

/// Static driver metadata, used to reject unsupported mount options
/// before any storage is touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    /// The driver can enforce read-only access on its mounts.
    pub read_only: bool,
    /// Backing storage may live on a remote system.
    pub remote: bool,
}

/// Contract every storage backend satisfies.
///
/// `create` must be an idempotent upsert: called again with the same
/// name and options after a partial failure it returns the existing
/// mount point instead of erroring, so a crashed creation can be
/// retried safely.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Driver name used in volume records and lookups.
    fn name(&self) -> &str;

    /// Allocate (or confirm) backing storage and return its host path.
    async fn create(&self, name: &str, options: &HashMap<String, String>) -> KegResult<PathBuf>;

    /// Delete backing storage.
    ///
    /// Fails if the storage is busy at the filesystem level; that check
    /// is independent of the reference counting done above the driver.
    async fn remove(&self, name: &str) -> KegResult<()>;

    /// Locate existing backing storage without side effects.
    async fn mount_point_for(&self, name: &str) -> KegResult<PathBuf>;

    /// Static capability metadata.
    fn describe(&self) -> DriverCapabilities;
}

/// By-name driver registry.
///
/// The built-in local driver is installed at construction; external
/// drivers are registered at process startup. The bind passthrough
/// driver is held outside the map: it never backs a named volume and
/// is not selectable by name.
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn VolumeDriver>>>,
    bind: Arc<BindDriver>,
}

impl DriverRegistry {
    /// Create a registry with the built-in local driver rooted at
    /// `volumes_dir`.
    #[must_use]
    pub fn new(volumes_dir: impl Into<PathBuf>) -> Self {
        let local: Arc<dyn VolumeDriver> = Arc::new(LocalDriver::new(volumes_dir));
        let mut drivers = HashMap::new();
        drivers.insert(local.name().to_string(), local);
        Self {
            drivers: RwLock::new(drivers),
            bind: Arc::new(BindDriver::new()),
        }
    }

    /// Register an external driver under its own name.
    ///
    /// Replaces any driver already registered under that name.
    pub fn register(&self, driver: Arc<dyn VolumeDriver>) {
        let name = driver.name().to_string();
        let previous = self.drivers.write().insert(name.clone(), driver);
        if previous.is_some() {
            tracing::warn!(driver = %name, "Replaced registered volume driver");
        } else {
            tracing::debug!(driver = %name, "Registered volume driver");
        }
    }

    /// Look up a driver by name.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::DriverNotFound`] if no driver is registered
    /// under `name`.
    pub fn get(&self, name: &str) -> KegResult<Arc<dyn VolumeDriver>> {
        self.drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KegError::DriverNotFound {
                driver: name.to_string(),
            })
    }

    /// The internal bind passthrough driver.
    #[must_use]
    pub fn bind(&self) -> Arc<BindDriver> {
        Arc::clone(&self.bind)
    }

    /// Names of all registered drivers, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver;

    #[async_trait]
    impl VolumeDriver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }

        async fn create(&self, _name: &str, _options: &HashMap<String, String>) -> KegResult<PathBuf> {
            Ok(PathBuf::from("/dev/null"))
        }

        async fn remove(&self, _name: &str) -> KegResult<()> {
            Ok(())
        }

        async fn mount_point_for(&self, _name: &str) -> KegResult<PathBuf> {
            Ok(PathBuf::from("/dev/null"))
        }

        fn describe(&self) -> DriverCapabilities {
            DriverCapabilities::default()
        }
    }

    #[test]
    fn local_driver_is_built_in() {
        let registry = DriverRegistry::new("/tmp/keg-volumes");
        assert!(registry.get("local").is_ok());
        assert_eq!(registry.names(), vec!["local".to_string()]);
    }

    #[test]
    fn unknown_driver_is_an_error() {
        let registry = DriverRegistry::new("/tmp/keg-volumes");
        let Err(err) = registry.get("nfs") else {
            panic!("expected DriverNotFound");
        };
        assert!(matches!(err, KegError::DriverNotFound { driver } if driver == "nfs"));
    }

    #[test]
    fn bind_driver_is_not_in_the_map() {
        let registry = DriverRegistry::new("/tmp/keg-volumes");
        assert!(registry.get("bind").is_err());
        assert_eq!(registry.bind().name(), "bind");
    }

    #[test]
    fn register_external_driver() {
        let registry = DriverRegistry::new("/tmp/keg-volumes");
        registry.register(Arc::new(NullDriver));
        assert!(registry.get("null").is_ok());
        assert_eq!(registry.names(), vec!["local".to_string(), "null".to_string()]);
    }
}
