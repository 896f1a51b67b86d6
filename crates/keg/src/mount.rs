//! Mount specifications and resolved bindings.
//!
//! A [`BindSpec`] is what a container-creation request carries: a source
//! (volume name, host path, or nothing for an anonymous volume), a target
//! path inside the container, and options. A [`MountBinding`] is the
//! resolved form: a concrete host path paired with the target, produced
//! once per container creation and handed to the supervisor, never
//! persisted.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use keg_common::{KegError, VolumeName};

/// Access mode of a mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    /// Read-write access (the default).
    #[default]
    ReadWrite,
    /// Read-only access.
    ReadOnly,
}

impl MountMode {
    /// Whether this mode denies writes.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadWrite => write!(f, "rw"),
            Self::ReadOnly => write!(f, "ro"),
        }
    }
}

/// Platform consistency hint for a mount.
///
/// Advisory only: carried through to the supervisor untouched and assigned
/// no behavior by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// No preference.
    #[default]
    Default,
    /// Full consistency between host and container.
    Consistent,
    /// Host view is authoritative.
    Cached,
    /// Container view is authoritative.
    Delegated,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Consistent => write!(f, "consistent"),
            Self::Cached => write!(f, "cached"),
            Self::Delegated => write!(f, "delegated"),
        }
    }
}

/// A requested mount: source, container target, and options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindSpec {
    /// Volume name or absolute host path; `None` requests an anonymous
    /// volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Absolute path inside the container.
    pub target: PathBuf,
    /// Access mode.
    #[serde(default)]
    pub mode: MountMode,
    /// Advisory consistency hint.
    #[serde(default)]
    pub consistency: Consistency,
    /// Driver options for a volume-backed mount, passed through to the
    /// driver when this spec triggers volume creation.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub driver_options: HashMap<String, String>,
}

impl BindSpec {
    /// Mount a named volume at `target`.
    #[must_use]
    pub fn volume(name: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(name.into()),
            target: target.into(),
            mode: MountMode::default(),
            consistency: Consistency::default(),
            driver_options: HashMap::new(),
        }
    }

    /// Mount the host path `source` at `target`.
    #[must_use]
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into().to_string_lossy().into_owned()),
            target: target.into(),
            mode: MountMode::default(),
            consistency: Consistency::default(),
            driver_options: HashMap::new(),
        }
    }

    /// Mount a fresh anonymous volume at `target`.
    #[must_use]
    pub fn anonymous(target: impl Into<PathBuf>) -> Self {
        Self {
            source: None,
            target: target.into(),
            mode: MountMode::default(),
            consistency: Consistency::default(),
            driver_options: HashMap::new(),
        }
    }

    /// Request read-only access.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.mode = MountMode::ReadOnly;
        self
    }

    /// Set the advisory consistency hint.
    #[must_use]
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Add a driver option for volume creation.
    #[must_use]
    pub fn driver_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.driver_options.insert(key.into(), value.into());
        self
    }
}

impl FromStr for BindSpec {
    type Err = KegError;

    /// Parse the one-string form `[SOURCE:]TARGET[:OPTIONS]`.
    ///
    /// `OPTIONS` is a comma-separated list of `ro`, `rw` and the
    /// consistency hints. A single absolute path requests an anonymous
    /// volume at that path; a source beginning with `/` is a host bind;
    /// any other source is a volume name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| KegError::InvalidMountSpec {
            spec: s.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = s.split(':').collect();
        let (source, target, options) = match parts.as_slice() {
            [target] => (None, *target, None),
            [source, target] => (Some(*source), *target, None),
            [source, target, options] => (Some(*source), *target, Some(*options)),
            _ => return Err(invalid("too many ':' separators")),
        };

        if target.is_empty() {
            return Err(invalid("empty target"));
        }
        if let Some(src) = source {
            if src.is_empty() {
                return Err(invalid("empty source"));
            }
        }

        let mut spec = match source {
            None => Self::anonymous(target),
            Some(src) if src.starts_with('/') => Self::bind(src, target),
            Some(src) => Self::volume(src, target),
        };

        if let Some(options) = options {
            for option in options.split(',') {
                match option {
                    "rw" => spec.mode = MountMode::ReadWrite,
                    "ro" => spec.mode = MountMode::ReadOnly,
                    "default" => spec.consistency = Consistency::Default,
                    "consistent" => spec.consistency = Consistency::Consistent,
                    "cached" => spec.consistency = Consistency::Cached,
                    "delegated" => spec.consistency = Consistency::Delegated,
                    "" => return Err(invalid("empty option")),
                    other => {
                        return Err(KegError::InvalidMountSpec {
                            spec: s.to_string(),
                            message: format!("unknown option '{other}'"),
                        });
                    }
                }
            }
        }

        Ok(spec)
    }
}

/// A resolved host-path-to-container-path binding.
///
/// Produced fresh for every container-creation call and consumed once by
/// the supervisor; bindings are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountBinding {
    /// Absolute host path backing the mount; exists when handed out.
    pub host_path: PathBuf,
    /// Absolute path inside the container.
    pub target: PathBuf,
    /// Access mode.
    pub mode: MountMode,
    /// Advisory consistency hint, passed through unchanged.
    pub consistency: Consistency,
    /// Name of the backing volume, if the source was volume-backed.
    pub volume: Option<VolumeName>,
    /// Driver that produced `host_path`.
    pub driver: String,
}
