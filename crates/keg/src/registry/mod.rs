//! Durable volume registry.
//!
//! Exclusive owner of volume records: callers go through the operations
//! here and never mutate records directly. Mutations are serialized per
//! volume name, so unrelated volumes proceed without contention while
//! concurrent requests for the same name see exactly one creation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use keg_common::{KegError, KegPaths, KegResult, VolumeName};

use crate::driver::DriverRegistry;
use crate::events::{EventBus, VolumeEvent};
use crate::refs::ReferenceTracker;
use crate::volume::{Volume, VolumeFilter};

mod store;

pub use store::VolumeStore;

/// What a [`VolumeRegistry::get_or_create`] call did.
#[derive(Debug, Clone)]
pub struct GetOrCreateOutcome {
    /// The record, found or freshly created.
    pub volume: Volume,
    /// Whether this call performed the creation.
    pub created: bool,
    /// Whether this call added a new reference for the holder.
    pub acquired: bool,
}

/// Durable, name-keyed volume metadata store.
#[derive(Debug)]
pub struct VolumeRegistry {
    store: VolumeStore,
    records: RwLock<HashMap<VolumeName, Volume>>,
    creating: DashMap<String, Arc<Mutex<()>>>,
    drivers: Arc<DriverRegistry>,
    refs: Arc<ReferenceTracker>,
    events: EventBus,
}

impl VolumeRegistry {
    /// Open the registry under `paths`, loading all existing records.
    ///
    /// Record-level events (`Created`, `Removed`) are published on
    /// `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry directory cannot be created or
    /// read. Individual corrupt records are skipped, not fatal.
    pub fn open(
        paths: &KegPaths,
        drivers: Arc<DriverRegistry>,
        refs: Arc<ReferenceTracker>,
        events: EventBus,
    ) -> KegResult<Self> {
        let store = VolumeStore::open(paths.registry())?;
        let mut records = HashMap::new();
        for volume in store.load_all()? {
            records.insert(volume.name.clone(), volume);
        }

        tracing::info!(
            count = records.len(),
            root = %paths.root.display(),
            "Volume registry opened"
        );

        Ok(Self {
            store,
            records: RwLock::new(records),
            creating: DashMap::new(),
            drivers,
            refs,
            events,
        })
    }

    /// Return the volume named `name`, creating it if absent.
    ///
    /// With `name` unset, a fresh anonymous volume is created under a
    /// generated identifier. With `holder` set, a reference for that
    /// container is acquired before the per-name lock is released, so a
    /// concurrent non-forced [`remove`](Self::remove) either runs
    /// before this call or fails with [`KegError::InUse`].
    ///
    /// Concurrent calls for the same name are serialized: exactly one
    /// driver `create` happens and every caller observes the same
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::Conflict`] if the volume exists with a
    /// different driver or options, [`KegError::DriverNotFound`] for an
    /// unknown driver, or the driver/store failure that aborted the
    /// creation. On any error no record is left behind and no reference
    /// is taken.
    pub async fn get_or_create(
        &self,
        name: Option<VolumeName>,
        driver_name: &str,
        options: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        holder: Option<&str>,
    ) -> KegResult<GetOrCreateOutcome> {
        match name {
            Some(name) => {
                let lock = self.creation_lock(name.as_str());
                let _guard = lock.lock().await;

                if let Some(existing) = self.records.read().get(name.as_str()).cloned() {
                    if !existing.same_config(driver_name, options) {
                        let message = if existing.driver == driver_name {
                            "driver options differ from the existing volume".to_string()
                        } else {
                            format!(
                                "created with driver '{}', requested '{}'",
                                existing.driver, driver_name
                            )
                        };
                        return Err(KegError::Conflict {
                            name: name.to_string(),
                            message,
                        });
                    }
                    let acquired = self.acquire_for(&existing, holder);
                    return Ok(GetOrCreateOutcome {
                        volume: existing,
                        created: false,
                        acquired,
                    });
                }

                let volume = self
                    .create_locked(name, driver_name, options, labels, false)
                    .await?;
                let acquired = self.acquire_for(&volume, holder);
                Ok(GetOrCreateOutcome {
                    volume,
                    created: true,
                    acquired,
                })
            }
            None => loop {
                // Collision-checked against existing names under the
                // same per-name lock a named create would take.
                let name = VolumeName::anonymous();
                let lock = self.creation_lock(name.as_str());
                let _guard = lock.lock().await;
                if self.records.read().contains_key(name.as_str()) {
                    continue;
                }
                let volume = self
                    .create_locked(name, driver_name, options, labels, true)
                    .await?;
                let acquired = self.acquire_for(&volume, holder);
                return Ok(GetOrCreateOutcome {
                    volume,
                    created: true,
                    acquired,
                });
            },
        }
    }

    /// Look up a volume record.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::NotFound`] if no record exists.
    pub fn get(&self, name: &str) -> KegResult<Volume> {
        self.records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KegError::NotFound {
                name: name.to_string(),
            })
    }

    /// Snapshot of all records passing `filter`, ordered by creation
    /// time ascending (ties broken by name).
    #[must_use]
    pub fn list(&self, filter: &VolumeFilter) -> Vec<Volume> {
        let mut volumes: Vec<Volume> = self
            .records
            .read()
            .values()
            .filter(|v| filter.matches(v, self.refs.is_dangling(v.name.as_str())))
            .cloned()
            .collect();
        volumes.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        volumes
    }

    /// Remove a volume: reference check, driver removal, then record
    /// deletion. Returns the removed record.
    ///
    /// `force` overrides the reference check but never a driver
    /// refusal. If the record deletion fails after the driver removal,
    /// the record stays behind and the removal can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::NotFound`] for an unknown volume,
    /// [`KegError::InUse`] for a referenced volume without `force`, or
    /// the driver/store failure that aborted the removal.
    pub async fn remove(&self, name: &str, force: bool) -> KegResult<Volume> {
        let lock = self.creation_lock(name);
        let _guard = lock.lock().await;

        let volume = self
            .records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KegError::NotFound {
                name: name.to_string(),
            })?;

        let holders = self.refs.count(name);
        if holders > 0 {
            if !force {
                return Err(KegError::InUse {
                    name: name.to_string(),
                    containers: holders,
                });
            }
            tracing::warn!(volume = %name, holders, "Removing volume with live references");
        }

        let driver = self.drivers.get(&volume.driver)?;
        driver.remove(name).await?;

        self.store.delete(name)?;
        self.records.write().remove(name);
        self.refs.clear(name);

        self.events.publish(VolumeEvent::Removed {
            name: name.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        });
        tracing::info!(volume = %name, driver = %volume.driver, "Volume removed");
        Ok(volume)
    }

    /// Create storage and record for a volume that does not exist yet.
    /// Caller holds the per-name creation lock.
    async fn create_locked(
        &self,
        name: VolumeName,
        driver_name: &str,
        options: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        anonymous: bool,
    ) -> KegResult<Volume> {
        let driver = self.drivers.get(driver_name)?;
        let mount_point = driver.create(name.as_str(), options).await?;

        let mut volume = Volume::new(name.clone(), driver_name, mount_point)
            .with_options(options.clone())
            .with_labels(labels.clone());
        if anonymous {
            volume = volume.anonymous();
        }

        // No await between the driver returning and the record landing:
        // cancellation cannot split a finished create from its record.
        if let Err(e) = self.store.save(&volume) {
            tracing::warn!(
                volume = %name,
                error = %e,
                "Record write failed, rolling back driver create"
            );
            if let Err(rollback) = driver.remove(name.as_str()).await {
                tracing::warn!(volume = %name, error = %rollback, "Driver rollback failed");
            }
            return Err(e);
        }
        self.records.write().insert(name.clone(), volume.clone());

        self.events.publish(VolumeEvent::Created {
            name: name.to_string(),
            driver: driver_name.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        });
        tracing::info!(volume = %name, driver = %driver_name, anonymous, "Volume created");
        Ok(volume)
    }

    /// Take the holder's reference while the caller still holds the
    /// per-name lock.
    fn acquire_for(&self, volume: &Volume, holder: Option<&str>) -> bool {
        holder.is_some_and(|container| self.refs.acquire(volume.name.as_str(), container))
    }

    /// Per-name creation/removal lock. Entries are never evicted.
    fn creation_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.creating.entry(name.to_string()).or_default().clone()
    }
}
