//! Standard filesystem paths for Keg.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for Keg data.
pub static KEG_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KEG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/keg"))
});

/// Standard paths used by the volume engine.
///
/// The registry directory holds one durable JSON record per volume; the
/// volumes directory is the managed root the local driver allocates backing
/// directories under. The registry never writes below a volume's data
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KegPaths {
    /// Root data directory (default: /var/lib/keg).
    pub root: PathBuf,
}

impl KegPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding one metadata record per volume.
    #[must_use]
    pub fn registry(&self) -> PathBuf {
        self.root.join("registry")
    }

    /// Metadata record for a specific volume.
    #[must_use]
    pub fn record(&self, name: &str) -> PathBuf {
        self.registry().join(format!("{name}.json"))
    }

    /// Managed root for local driver storage.
    #[must_use]
    pub fn volumes(&self) -> PathBuf {
        self.root.join("volumes")
    }

    /// Backing data directory for a local volume.
    #[must_use]
    pub fn volume_data(&self, name: &str) -> PathBuf {
        self.volumes().join(name).join("_data")
    }

    /// Create all necessary directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.registry())?;
        std::fs::create_dir_all(self.volumes())?;
        Ok(())
    }
}

impl Default for KegPaths {
    fn default() -> Self {
        Self {
            root: KEG_ROOT.clone(),
        }
    }
}
