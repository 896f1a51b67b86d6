//! Engine configuration.

use std::path::PathBuf;

use keg_common::KegPaths;

/// Configuration for the volume engine.
#[derive(Debug, Clone)]
pub struct KegConfig {
    /// Paths for engine data.
    pub paths: KegPaths,
    /// Driver used when a request does not name one.
    pub default_driver: String,
    /// Whether to use rootless mode.
    pub rootless: bool,
}

impl Default for KegConfig {
    fn default() -> Self {
        Self {
            paths: KegPaths::new(),
            default_driver: "local".to_string(),
            rootless: false,
        }
    }
}

impl KegConfig {
    /// Create a rootless configuration.
    #[must_use]
    pub fn rootless() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        let root = home.join(".local/share/keg");

        Self {
            paths: KegPaths::with_root(root),
            default_driver: "local".to_string(),
            rootless: true,
        }
    }

    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = KegPaths::with_root(root);
        self
    }

    /// Set the default driver.
    #[must_use]
    pub fn with_default_driver(mut self, driver: impl Into<String>) -> Self {
        self.default_driver = driver.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = KegConfig::default();
        assert!(!config.rootless);
        assert_eq!(config.default_driver, "local");
    }

    #[test]
    fn rootless_config() {
        let config = KegConfig::rootless();
        assert!(config.rootless);
        assert!(config.paths.root.ends_with(".local/share/keg"));
    }

    #[test]
    fn builder_pattern() {
        let config = KegConfig::default()
            .with_root("/custom/root")
            .with_default_driver("nfs");

        assert_eq!(config.paths.root, PathBuf::from("/custom/root"));
        assert_eq!(config.default_driver, "nfs");
    }
}
