//! # keg-common
//!
//! Shared utilities and types for the Keg volume engine.
//!
//! This crate provides common functionality used across all Keg crates:
//! - Volume name validation and anonymous-name generation
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;

pub use error::{KegError, KegResult};
pub use name::VolumeName;
pub use paths::KegPaths;
