//! # Keg Volume Engine
//!
//! Keg is the volume lifecycle and mount-resolution subsystem of a
//! container runtime: it creates, locates and removes driver-backed
//! volumes, tracks which containers use them, and turns mount requests
//! into the ordered host-path bindings a container supervisor applies.
//!
//! ## Features
//!
//! - **Durable registry**: crash-consistent one-record-per-volume
//!   metadata with atomic replace semantics
//! - **Pluggable drivers**: built-in local and bind-passthrough
//!   backends plus by-name registration of external drivers
//! - **Safe concurrency**: per-name serialization so concurrent
//!   requests for the same volume see exactly one creation
//! - **Mount composition**: target validation, conflict detection and
//!   ancestor-before-descendant ordering
//!
//! ## Usage
//!
//! ```no_run
//! use keg::{BindSpec, CreateVolume, KegConfig, VolumeManager};
//!
//! # async fn example() -> keg::KegResult<()> {
//! let manager = VolumeManager::new(KegConfig::default())?;
//!
//! // Create a named volume
//! let volume = manager.create(CreateVolume::named("app-data")).await?;
//!
//! // Resolve mounts for a new container
//! let specs = vec![
//!     BindSpec::volume("app-data", "/var/lib/app"),
//!     BindSpec::bind("/etc/app.conf", "/etc/app.conf").read_only(),
//! ];
//! let bindings = manager.resolve_mounts("container-1", &specs, None).await?;
//!
//! // Container is gone; drop its references
//! manager.container_removed("container-1").await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod driver;
pub mod events;
pub mod manager;
pub mod mount;
pub mod refs;
pub mod registry;
pub mod resolver;
pub mod volume;

pub use config::KegConfig;
pub use driver::{BindDriver, DriverCapabilities, DriverRegistry, LocalDriver, VolumeDriver};
pub use events::{EventBus, VolumeEvent};
pub use keg_common::{KegError, KegPaths, KegResult, VolumeName};
pub use manager::{CreateVolume, PruneFailure, PruneReport, VolumeManager};
pub use mount::{BindSpec, Consistency, MountBinding, MountMode};
pub use refs::ReferenceTracker;
pub use registry::{GetOrCreateOutcome, VolumeRegistry, VolumeStore};
pub use resolver::MountResolver;
pub use volume::{Volume, VolumeDetails, VolumeFilter};
