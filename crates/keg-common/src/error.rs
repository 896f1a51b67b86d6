//! Common error types for the Keg volume engine.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`KegError`].
pub type KegResult<T> = Result<T, KegError>;

/// Errors produced by the volume engine.
#[derive(Error, Diagnostic, Debug)]
pub enum KegError {
    /// Volume not found.
    #[error("Volume not found: {name}")]
    #[diagnostic(code(keg::volume::not_found))]
    NotFound {
        /// The volume name that was not found.
        name: String,
    },

    /// A volume with this name already exists with different configuration.
    #[error("Volume '{name}' already exists: {message}")]
    #[diagnostic(
        code(keg::volume::conflict),
        help("Remove the existing volume or request it with a matching driver and options")
    )]
    Conflict {
        /// The contested volume name.
        name: String,
        /// What differs from the existing record.
        message: String,
    },

    /// Two or more mounts in one request claim the same container path.
    #[error("Conflicting mount targets: {}", .targets.join(", "))]
    #[diagnostic(code(keg::mount::target_conflict))]
    TargetConflict {
        /// The offending container paths.
        targets: Vec<String>,
    },

    /// A volume driver operation failed.
    #[error("Driver '{driver}' failed on volume '{volume}': {message}")]
    #[diagnostic(code(keg::driver))]
    Driver {
        /// The driver that reported the failure.
        driver: String,
        /// The volume (or host path, for binds) being operated on.
        volume: String,
        /// The underlying cause.
        message: String,
    },

    /// No driver registered under this name.
    #[error("Volume driver not registered: {driver}")]
    #[diagnostic(
        code(keg::driver::not_found),
        help("Built-in drivers are registered at startup; external drivers must be registered before use")
    )]
    DriverNotFound {
        /// The missing driver name.
        driver: String,
    },

    /// The requested capability is not offered by the driver.
    #[error("Driver '{driver}' does not support {capability}")]
    #[diagnostic(
        code(keg::driver::unsupported),
        help("Pick a driver that advertises this capability or drop the option")
    )]
    Unsupported {
        /// The driver that lacks the capability.
        driver: String,
        /// The capability that was requested.
        capability: String,
    },

    /// Non-forced removal of a volume that containers still reference.
    #[error("Volume '{name}' is in use by {containers} container(s)")]
    #[diagnostic(
        code(keg::volume::in_use),
        help("Stop the containers using this volume, or remove with force")
    )]
    InUse {
        /// The referenced volume.
        name: String,
        /// Number of distinct containers holding it.
        containers: usize,
    },

    /// Invalid volume name format.
    #[error("Invalid volume name: {name}")]
    #[diagnostic(
        code(keg::volume::invalid_name),
        help("Volume names start with an alphanumeric character and may contain '_', '.' and '-', up to 128 characters")
    )]
    InvalidName {
        /// The invalid name.
        name: String,
    },

    /// Invalid mount target path.
    #[error("Invalid mount target: {target}")]
    #[diagnostic(
        code(keg::mount::invalid_target),
        help("Mount targets must be absolute paths without '.' or '..' components")
    )]
    InvalidTarget {
        /// The invalid container path.
        target: String,
    },

    /// A mount specification string could not be parsed.
    #[error("Invalid mount specification '{spec}': {message}")]
    #[diagnostic(
        code(keg::mount::invalid_spec),
        help("Expected [SOURCE:]TARGET[:OPTIONS] with OPTIONS from: ro, rw, consistent, cached, delegated, default")
    )]
    InvalidMountSpec {
        /// The specification string as given.
        spec: String,
        /// What could not be parsed.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(keg::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(keg::serialization))]
    Serialization(String),
}

impl From<serde_json::Error> for KegError {
    fn from(err: serde_json::Error) -> Self {
        KegError::Serialization(err.to_string())
    }
}
