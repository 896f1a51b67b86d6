//! Bind passthrough pseudo-driver.
//!
//! Used internally for host-path sources. It owns no storage: `create`
//! only validates that the host path exists, `remove` is a no-op, and
//! no registry record is ever written for it.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use keg_common::{KegError, KegResult};

use super::{DriverCapabilities, VolumeDriver};

/// Driver name. Never appears in volume records.
const NAME: &str = "bind";

/// Host-path passthrough driver.
#[derive(Debug, Default)]
pub struct BindDriver;

impl BindDriver {
    /// Create the passthrough driver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn validate(path: &str) -> KegResult<PathBuf> {
        let host = PathBuf::from(path);
        if !host.is_absolute() {
            return Err(KegError::Driver {
                driver: NAME.to_string(),
                volume: path.to_string(),
                message: "bind source must be an absolute host path".to_string(),
            });
        }
        if !host.exists() {
            return Err(KegError::Driver {
                driver: NAME.to_string(),
                volume: path.to_string(),
                message: "host path does not exist".to_string(),
            });
        }
        Ok(host)
    }
}

#[async_trait]
impl VolumeDriver for BindDriver {
    fn name(&self) -> &str {
        NAME
    }

    async fn create(&self, name: &str, _options: &HashMap<String, String>) -> KegResult<PathBuf> {
        Self::validate(name)
    }

    async fn remove(&self, _name: &str) -> KegResult<()> {
        // Host paths are not owned by the engine.
        Ok(())
    }

    async fn mount_point_for(&self, name: &str) -> KegResult<PathBuf> {
        Self::validate(name)
    }

    fn describe(&self) -> DriverCapabilities {
        DriverCapabilities {
            read_only: true,
            remote: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn existing_host_path_passes_through() {
        let temp = tempdir().unwrap();
        let driver = BindDriver::new();

        let source = temp.path().to_string_lossy().into_owned();
        let path = driver.create(&source, &HashMap::new()).await.unwrap();
        assert_eq!(path, temp.path());
    }

    #[tokio::test]
    async fn missing_host_path_is_rejected() {
        let driver = BindDriver::new();
        let err = driver
            .create("/nonexistent/keg/bind/source", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KegError::Driver { .. }));
    }

    #[tokio::test]
    async fn relative_path_is_rejected() {
        let driver = BindDriver::new();
        assert!(driver.create("srv/data", &HashMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn remove_is_a_no_op() {
        let temp = tempdir().unwrap();
        let driver = BindDriver::new();

        let source = temp.path().to_string_lossy().into_owned();
        driver.remove(&source).await.unwrap();
        assert!(temp.path().exists());
    }
}
