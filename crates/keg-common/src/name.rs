//! Volume name validation and generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{KegError, KegResult};

/// A validated volume name.
///
/// Volume names must:
/// - Be 1-128 characters long
/// - Contain only alphanumeric characters, underscores, dots, and hyphens
/// - Start with an alphanumeric character
///
/// Anonymous volumes carry a generated 64-character hex name so they are
/// indistinguishable from named volumes everywhere below the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeName(String);

impl VolumeName {
    /// Maximum length of a volume name.
    ///
    /// Short enough that a name plus the registry's record suffix stays
    /// under the 255-byte filename limit of common filesystems.
    pub const MAX_LENGTH: usize = 128;

    /// Create a new volume name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the name format is invalid.
    pub fn new(name: impl Into<String>) -> KegResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Generate a fresh opaque name for an anonymous volume.
    ///
    /// The name is a 64-character hex string, matching the identifiers the
    /// engine hands out when a mount request omits the source.
    #[must_use]
    pub fn anonymous() -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        Self(hex::encode(bytes))
    }

    /// Create a volume name without validation.
    ///
    /// The caller must ensure the name is valid.
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the volume name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short version of the name (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        if self.0.len() <= 12 {
            &self.0
        } else {
            &self.0[..12]
        }
    }

    /// Check whether a string is a well-formed volume name.
    #[must_use]
    pub fn is_valid(name: &str) -> bool {
        Self::validate(name).is_ok()
    }

    /// Validate a volume name string.
    fn validate(name: &str) -> KegResult<()> {
        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return Err(KegError::InvalidName {
                name: name.to_string(),
            });
        }

        if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return Err(KegError::InvalidName {
                name: name.to_string(),
            });
        }

        for c in name.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(KegError::InvalidName {
                    name: name.to_string(),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VolumeName {
    type Err = KegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for VolumeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
