//! Built-in local filesystem driver.
//!
//! Allocates one directory per volume under a managed root, with the
//! data rooted at `<volumes>/<name>/_data`.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;

use keg_common::{KegError, KegResult};

use super::{DriverCapabilities, VolumeDriver};

/// Driver name.
const NAME: &str = "local";

/// Local filesystem driver.
#[derive(Debug)]
pub struct LocalDriver {
    /// Managed root for backing directories.
    volumes_dir: PathBuf,
}

/// Options understood by the local driver.
#[derive(Debug, Default)]
struct LocalOptions {
    uid: Option<u32>,
    gid: Option<u32>,
    mode: Option<u32>,
}

impl LocalOptions {
    fn parse(volume: &str, options: &HashMap<String, String>) -> KegResult<Self> {
        let mut parsed = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "uid" => {
                    parsed.uid = Some(value.parse().map_err(|_| {
                        driver_error(volume, format!("invalid uid '{value}'"))
                    })?);
                }
                "gid" => {
                    parsed.gid = Some(value.parse().map_err(|_| {
                        driver_error(volume, format!("invalid gid '{value}'"))
                    })?);
                }
                "mode" => {
                    parsed.mode = Some(u32::from_str_radix(value, 8).map_err(|_| {
                        driver_error(volume, format!("invalid mode '{value}', expected octal"))
                    })?);
                }
                other => {
                    return Err(driver_error(volume, format!("unknown option '{other}'")));
                }
            }
        }
        Ok(parsed)
    }
}

fn driver_error(volume: &str, message: impl Into<String>) -> KegError {
    KegError::Driver {
        driver: NAME.to_string(),
        volume: volume.to_string(),
        message: message.into(),
    }
}

impl LocalDriver {
    /// Create a local driver rooted at `volumes_dir`.
    #[must_use]
    pub fn new(volumes_dir: impl Into<PathBuf>) -> Self {
        Self {
            volumes_dir: volumes_dir.into(),
        }
    }

    /// Backing data directory for `name`.
    #[must_use]
    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.volumes_dir.join(name).join("_data")
    }
}

#[async_trait]
impl VolumeDriver for LocalDriver {
    fn name(&self) -> &str {
        NAME
    }

    async fn create(&self, name: &str, options: &HashMap<String, String>) -> KegResult<PathBuf> {
        // Reject bad options before touching the filesystem.
        let opts = LocalOptions::parse(name, options)?;

        let path = self.data_dir(name);
        fs::create_dir_all(&path).map_err(|e| driver_error(name, e.to_string()))?;

        if opts.uid.is_some() || opts.gid.is_some() {
            std::os::unix::fs::chown(&path, opts.uid, opts.gid)
                .map_err(|e| driver_error(name, format!("chown failed: {e}")))?;
        }
        if let Some(mode) = opts.mode {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))
                .map_err(|e| driver_error(name, format!("chmod failed: {e}")))?;
        }

        tracing::debug!(volume = %name, path = %path.display(), "Local storage ready");
        Ok(path)
    }

    async fn remove(&self, name: &str) -> KegResult<()> {
        let dir = self.volumes_dir.join(name);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| driver_error(name, e.to_string()))?;
            tracing::debug!(volume = %name, path = %dir.display(), "Local storage removed");
        }
        Ok(())
    }

    async fn mount_point_for(&self, name: &str) -> KegResult<PathBuf> {
        let path = self.data_dir(name);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(KegError::NotFound {
                name: name.to_string(),
            })
        }
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
    async fn create_allocates_data_dir() {
        let temp = tempdir().unwrap();
        let driver = LocalDriver::new(temp.path());

        let path = driver.create("v1", &HashMap::new()).await.unwrap();
        assert_eq!(path, temp.path().join("v1/_data"));
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let temp = tempdir().unwrap();
        let driver = LocalDriver::new(temp.path());

        let first = driver.create("v1", &HashMap::new()).await.unwrap();
        fs::write(first.join("keep.txt"), b"data").unwrap();

        let second = driver.create("v1", &HashMap::new()).await.unwrap();
        assert_eq!(first, second);
        assert!(second.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn mode_option_is_applied() {
        let temp = tempdir().unwrap();
        let driver = LocalDriver::new(temp.path());

        let mut options = HashMap::new();
        options.insert("mode".to_string(), "0700".to_string());
        let path = driver.create("v1", &options).await.unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let temp = tempdir().unwrap();
        let driver = LocalDriver::new(temp.path());

        let mut options = HashMap::new();
        options.insert("size".to_string(), "10G".to_string());
        assert!(driver.create("v1", &options).await.is_err());

        let mut options = HashMap::new();
        options.insert("uid".to_string(), "nobody".to_string());
        assert!(driver.create("v2", &options).await.is_err());

        let mut options = HashMap::new();
        options.insert("mode".to_string(), "rwx".to_string());
        assert!(driver.create("v3", &options).await.is_err());
    }

    #[tokio::test]
    async fn remove_deletes_storage() {
        let temp = tempdir().unwrap();
        let driver = LocalDriver::new(temp.path());

        driver.create("v1", &HashMap::new()).await.unwrap();
        driver.remove("v1").await.unwrap();
        assert!(!temp.path().join("v1").exists());

        // Removing again is a no-op.
        driver.remove("v1").await.unwrap();
    }

    #[tokio::test]
    async fn mount_point_lookup() {
        let temp = tempdir().unwrap();
        let driver = LocalDriver::new(temp.path());

        driver.create("v1", &HashMap::new()).await.unwrap();
        let path = driver.mount_point_for("v1").await.unwrap();
        assert!(path.is_dir());

        let err = driver.mount_point_for("ghost").await.unwrap_err();
        assert!(matches!(err, KegError::NotFound { .. }));
    }
}
