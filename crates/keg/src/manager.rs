//! Volume lifecycle orchestration.
//!
//! [`VolumeManager`] is the surface the container supervisor and CLI
//! layer call into: the user-facing verbs (create, inspect, list,
//! remove, prune), the mount-resolution entry point used during
//! container creation, and the teardown/startup notifications that keep
//! the reference tracker honest.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use keg_common::{KegResult, VolumeName};

use crate::config::KegConfig;
use crate::driver::{DriverRegistry, VolumeDriver};
use crate::events::{EventBus, VolumeEvent};
use crate::mount::{BindSpec, MountBinding};
use crate::refs::ReferenceTracker;
use crate::registry::VolumeRegistry;
use crate::resolver::MountResolver;
use crate::volume::{Volume, VolumeDetails, VolumeFilter};

/// A volume-creation request.
#[derive(Debug, Clone, Default)]
pub struct CreateVolume {
    /// Volume name; unset requests an anonymous volume.
    pub name: Option<String>,
    /// Driver name; unset uses the configured default.
    pub driver: Option<String>,
    /// Driver options, passed through opaquely.
    pub options: HashMap<String, String>,
    /// User labels.
    pub labels: HashMap<String, String>,
}

impl CreateVolume {
    /// Request a named volume.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Request an anonymous volume.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Select a driver.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Add a driver option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Add a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// One failed item in a prune batch.
#[derive(Debug, Clone, Serialize)]
pub struct PruneFailure {
    /// The volume that could not be removed.
    pub name: String,
    /// Why.
    pub error: String,
}

/// Aggregate outcome of a prune run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    /// Volumes removed.
    pub removed: Vec<String>,
    /// Volumes left alone because containers still reference them.
    pub skipped: Vec<String>,
    /// Volumes whose removal failed.
    pub failed: Vec<PruneFailure>,
    /// Best-effort bytes reclaimed from removed volumes.
    pub reclaimed_bytes: u64,
}

/// The volume engine.
#[derive(Debug)]
pub struct VolumeManager {
    config: KegConfig,
    drivers: Arc<DriverRegistry>,
    registry: Arc<VolumeRegistry>,
    refs: Arc<ReferenceTracker>,
    resolver: MountResolver,
    events: EventBus,
}

impl VolumeManager {
    /// Bring up the engine: create the state directories, register the
    /// built-in drivers and load the registry.
    ///
    /// The reference tracker starts empty; call [`restore`] with the
    /// supervisor's live-container enumeration before trusting
    /// reference counts after a restart.
    ///
    /// [`restore`]: VolumeManager::restore
    ///
    /// # Errors
    ///
    /// Returns an error if the state directories cannot be created or
    /// the registry cannot be loaded.
    pub fn new(config: KegConfig) -> KegResult<Self> {
        config.paths.create_dirs()?;

        let drivers = Arc::new(DriverRegistry::new(config.paths.volumes()));
        let refs = Arc::new(ReferenceTracker::new());
        let events = EventBus::new();
        let registry = Arc::new(VolumeRegistry::open(
            &config.paths,
            Arc::clone(&drivers),
            Arc::clone(&refs),
            events.clone(),
        )?);
        let resolver = MountResolver::new(
            Arc::clone(&registry),
            Arc::clone(&drivers),
            Arc::clone(&refs),
            config.default_driver.clone(),
        );

        tracing::info!(
            root = %config.paths.root.display(),
            default_driver = %config.default_driver,
            "Volume manager started"
        );

        Ok(Self {
            config,
            drivers,
            registry,
            refs,
            resolver,
            events,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &KegConfig {
        &self.config
    }

    /// Create a volume, or return it if it already exists with the same
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name, an unknown driver, a
    /// configuration conflict with an existing volume, or a driver or
    /// persistence failure.
    pub async fn create(&self, request: CreateVolume) -> KegResult<Volume> {
        let name = request.name.map(VolumeName::new).transpose()?;
        let driver = request
            .driver
            .as_deref()
            .unwrap_or(&self.config.default_driver);

        let outcome = self
            .registry
            .get_or_create(name, driver, &request.options, &request.labels, None)
            .await?;
        Ok(outcome.volume)
    }

    /// A volume record together with its live usage.
    ///
    /// # Errors
    ///
    /// Returns [`keg_common::KegError::NotFound`] for an unknown
    /// volume.
    pub fn inspect(&self, name: &str) -> KegResult<VolumeDetails> {
        let volume = self.registry.get(name)?;
        let holders = self.refs.holders(name);
        Ok(VolumeDetails {
            volume,
            ref_count: holders.len(),
            holders,
        })
    }

    /// Snapshot of volumes passing `filter`, ordered by creation time.
    #[must_use]
    pub fn list(&self, filter: &VolumeFilter) -> Vec<Volume> {
        self.registry.list(filter)
    }

    /// Remove a volume. `force` overrides the reference check but not a
    /// driver refusal.
    ///
    /// # Errors
    ///
    /// Returns [`keg_common::KegError::NotFound`],
    /// [`keg_common::KegError::InUse`], or the driver/persistence
    /// failure that aborted the removal.
    pub async fn remove(&self, name: &str, force: bool) -> KegResult<()> {
        self.registry.remove(name, force).await?;
        Ok(())
    }

    /// Remove every unreferenced volume passing `filter`.
    ///
    /// Individual failures do not abort the run: each volume ends up in
    /// exactly one of the report's buckets.
    pub async fn prune(&self, filter: &VolumeFilter) -> PruneReport {
        let mut report = PruneReport::default();

        for volume in self.registry.list(filter) {
            let name = volume.name.to_string();
            if self.refs.count(&name) > 0 {
                report.skipped.push(name);
                continue;
            }

            // Measured before removal; counted only when it succeeds.
            let size = directory_size(&volume.mount_point);
            match self.registry.remove(&name, false).await {
                Ok(_) => {
                    report.reclaimed_bytes += size;
                    report.removed.push(name);
                }
                Err(keg_common::KegError::InUse { .. } | keg_common::KegError::NotFound { .. }) => {
                    // Raced with an acquire or a concurrent removal.
                    report.skipped.push(name);
                }
                Err(e) => {
                    tracing::warn!(volume = %name, error = %e, "Prune failed for volume");
                    report.failed.push(PruneFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            reclaimed_bytes = report.reclaimed_bytes,
            "Volume prune finished"
        );
        report
    }

    /// Resolve a container's mount specifications into ordered
    /// bindings. The mount-resolution entry point used by the
    /// supervisor during container creation.
    ///
    /// # Errors
    ///
    /// See [`MountResolver::resolve`]. On error no references are held
    /// and no bindings are returned.
    pub async fn resolve_mounts(
        &self,
        container_id: &str,
        specs: &[BindSpec],
        driver: Option<&str>,
    ) -> KegResult<Vec<MountBinding>> {
        let bindings = self.resolver.resolve(container_id, specs, driver).await?;

        let timestamp = chrono::Utc::now().timestamp();
        for binding in &bindings {
            if let Some(volume) = &binding.volume {
                self.events.publish(VolumeEvent::Mounted {
                    name: volume.to_string(),
                    container: container_id.to_string(),
                    timestamp,
                });
            }
        }

        Ok(bindings)
    }

    /// Supervisor notification that a container is gone.
    ///
    /// Releases every reference the container held, then removes
    /// released anonymous volumes that ended up unreferenced. Named
    /// volumes are never auto-removed. Returns the names of the
    /// volumes garbage-collected.
    pub async fn container_removed(&self, container_id: &str) -> Vec<VolumeName> {
        let released = self.refs.release_all(container_id);

        let timestamp = chrono::Utc::now().timestamp();
        for name in &released {
            self.events.publish(VolumeEvent::Unmounted {
                name: name.clone(),
                container: container_id.to_string(),
                timestamp,
            });
        }

        let mut collected = Vec::new();
        for name in released {
            let Ok(volume) = self.registry.get(&name) else {
                continue;
            };
            if !volume.anonymous || !self.refs.is_dangling(&name) {
                continue;
            }
            match self.registry.remove(&name, false).await {
                Ok(removed) => collected.push(removed.name),
                Err(keg_common::KegError::InUse { .. }) => {
                    // Another container picked it up in the meantime.
                    tracing::debug!(volume = %name, "Anonymous volume re-acquired, not collected");
                }
                Err(e) => {
                    tracing::warn!(volume = %name, error = %e, "Anonymous volume GC failed");
                }
            }
        }

        if !collected.is_empty() {
            tracing::debug!(
                container = %container_id,
                count = collected.len(),
                "Collected anonymous volumes"
            );
        }
        collected
    }

    /// Rebuild the reference tracker from the supervisor's enumeration
    /// of live containers and the volumes they hold. Called once at
    /// startup.
    pub fn restore<I>(&self, live: I)
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        self.refs.rebuild(live);
    }

    /// Subscribe to volume events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.events.subscribe()
    }

    /// Register an external volume driver.
    pub fn register_driver(&self, driver: Arc<dyn VolumeDriver>) {
        self.drivers.register(driver);
    }
}

/// Best-effort recursive size of a directory tree.
fn directory_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
