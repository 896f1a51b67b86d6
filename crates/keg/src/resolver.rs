//! Mount resolution.
//!
//! Turns a container's requested [`BindSpec`]s into validated, ordered
//! [`MountBinding`]s: targets are normalized and checked for conflicts,
//! volume-backed sources are materialized through the registry with the
//! container's reference taken in the same critical section, host paths
//! go through the bind passthrough driver, and the result is ordered so
//! ancestor targets mount before their descendants.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use keg_common::{KegError, KegResult, VolumeName};

use crate::driver::{DriverRegistry, VolumeDriver};
use crate::mount::{BindSpec, MountBinding};
use crate::refs::ReferenceTracker;
use crate::registry::VolumeRegistry;

/// Resolves mount requests for container creation.
#[derive(Debug)]
pub struct MountResolver {
    registry: Arc<VolumeRegistry>,
    drivers: Arc<DriverRegistry>,
    refs: Arc<ReferenceTracker>,
    default_driver: String,
}

impl MountResolver {
    /// Create a resolver using `default_driver` for specs that do not
    /// pick one.
    #[must_use]
    pub fn new(
        registry: Arc<VolumeRegistry>,
        drivers: Arc<DriverRegistry>,
        refs: Arc<ReferenceTracker>,
        default_driver: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            drivers,
            refs,
            default_driver: default_driver.into(),
        }
    }

    /// Resolve `specs` for a container being created.
    ///
    /// Each volume-backed binding holds a reference for `container_id`,
    /// taken inside the registry's per-name critical section as the
    /// source is materialized, so a concurrent removal either runs
    /// before the volume is resolved or observes the reference. On
    /// failure nothing is held: references taken by this call are
    /// released and anonymous volumes it created are removed again,
    /// whether the call returns an error or the caller drops the future
    /// mid-flight. Named volumes created before the failure stay, they
    /// are durable user-visible state.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::InvalidTarget`] or
    /// [`KegError::TargetConflict`] for bad target sets, and otherwise
    /// whatever lookup, capability or creation error aborted the
    /// request.
    pub async fn resolve(
        &self,
        container_id: &str,
        specs: &[BindSpec],
        driver: Option<&str>,
    ) -> KegResult<Vec<MountBinding>> {
        let driver_name = driver.unwrap_or(&self.default_driver);

        // Targets are checked before any storage is touched.
        let targets = normalize_targets(specs)?;

        let mut bindings = Vec::with_capacity(specs.len());
        let mut rollback = Rollback::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.refs),
            container_id,
        );

        for (spec, target) in specs.iter().zip(targets) {
            match self.classify(container_id, spec, target, driver_name).await {
                Ok(mut resolved) => {
                    rollback.note(&mut resolved);
                    bindings.push(resolved.binding);
                }
                Err(e) => {
                    rollback.undo().await;
                    return Err(e);
                }
            }
        }
        rollback.disarm();

        let bindings = order_bindings(bindings);

        tracing::debug!(
            container = %container_id,
            mounts = bindings.len(),
            "Resolved mounts"
        );
        Ok(bindings)
    }

    /// Materialize one spec into a binding.
    async fn classify(
        &self,
        container_id: &str,
        spec: &BindSpec,
        target: PathBuf,
        driver_name: &str,
    ) -> KegResult<Resolved> {
        match spec.source.as_deref() {
            // Absolute host path: bind passthrough, no registry record.
            Some(source) if source.starts_with('/') => {
                let bind = self.drivers.bind();
                check_mode(bind.as_ref(), spec)?;
                let host_path = bind.create(source, &spec.driver_options).await?;
                Ok(Resolved {
                    binding: MountBinding {
                        host_path,
                        target,
                        mode: spec.mode,
                        consistency: spec.consistency,
                        volume: None,
                        driver: bind.name().to_string(),
                    },
                    fresh_anonymous: None,
                    acquired: None,
                })
            }
            other => {
                let name = match other {
                    Some(source) => Some(VolumeName::new(source)?),
                    None => None,
                };

                // Capability check comes before any storage exists.
                let driver = self.drivers.get(driver_name)?;
                check_mode(driver.as_ref(), spec)?;

                let outcome = self
                    .registry
                    .get_or_create(
                        name,
                        driver_name,
                        &spec.driver_options,
                        &HashMap::new(),
                        Some(container_id),
                    )
                    .await?;
                let fresh_anonymous = (outcome.created && outcome.volume.anonymous)
                    .then(|| outcome.volume.name.clone());
                let acquired = outcome.acquired.then(|| outcome.volume.name.clone());

                Ok(Resolved {
                    binding: MountBinding {
                        host_path: outcome.volume.mount_point.clone(),
                        target,
                        mode: spec.mode,
                        consistency: spec.consistency,
                        volume: Some(outcome.volume.name),
                        driver: outcome.volume.driver,
                    },
                    fresh_anonymous,
                    acquired,
                })
            }
        }
    }
}

/// One materialized spec, with what the call changed for rollback.
struct Resolved {
    binding: MountBinding,
    fresh_anonymous: Option<VolumeName>,
    acquired: Option<VolumeName>,
}

/// Cleanup state for a resolution in flight.
///
/// Armed until the request either succeeds (`disarm`) or fails with an
/// error (`undo`). If the future is dropped instead, `Drop` performs
/// the same cleanup, releasing references synchronously and spawning
/// the volume removals.
struct Rollback {
    registry: Arc<VolumeRegistry>,
    refs: Arc<ReferenceTracker>,
    container: String,
    fresh_anonymous: Vec<VolumeName>,
    acquired: Vec<VolumeName>,
    armed: bool,
}

impl Rollback {
    fn new(registry: Arc<VolumeRegistry>, refs: Arc<ReferenceTracker>, container: &str) -> Self {
        Self {
            registry,
            refs,
            container: container.to_string(),
            fresh_anonymous: Vec::new(),
            acquired: Vec::new(),
            armed: true,
        }
    }

    fn note(&mut self, resolved: &mut Resolved) {
        self.fresh_anonymous.extend(resolved.fresh_anonymous.take());
        self.acquired.extend(resolved.acquired.take());
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Release the references taken by this request and remove the
    /// anonymous volumes it created, inline.
    async fn undo(&mut self) {
        for name in std::mem::take(&mut self.acquired) {
            self.refs.release(name.as_str(), &self.container);
        }
        // Drained as removals finish so a cancellation mid-undo leaves
        // only the remainder to the drop handler.
        while let Some(name) = self.fresh_anonymous.pop() {
            if let Err(e) = self.registry.remove(name.as_str(), false).await {
                tracing::warn!(volume = %name, error = %e, "Rollback removal failed");
            }
        }
        self.armed = false;
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // The caller dropped the resolution mid-flight. References are
        // released right here; volume removal is async and moves to a
        // runtime task.
        for name in &self.acquired {
            self.refs.release(name.as_str(), &self.container);
        }
        let fresh = std::mem::take(&mut self.fresh_anonymous);
        if fresh.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = Arc::clone(&self.registry);
                handle.spawn(async move {
                    for name in fresh {
                        if let Err(e) = registry.remove(name.as_str(), false).await {
                            tracing::warn!(volume = %name, error = %e, "Rollback removal failed");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    count = fresh.len(),
                    "No runtime for rollback, anonymous volumes left to prune"
                );
            }
        }
    }
}

fn check_mode(driver: &dyn VolumeDriver, spec: &BindSpec) -> KegResult<()> {
    if spec.mode.is_read_only() && !driver.describe().read_only {
        return Err(KegError::Unsupported {
            driver: driver.name().to_string(),
            capability: "read-only mounts".to_string(),
        });
    }
    Ok(())
}

/// Normalize all targets and reject duplicates.
fn normalize_targets(specs: &[BindSpec]) -> KegResult<Vec<PathBuf>> {
    let mut normalized = Vec::with_capacity(specs.len());
    for spec in specs {
        normalized.push(normalize_target(&spec.target)?);
    }

    let mut seen: HashSet<&Path> = HashSet::new();
    let mut duplicates: BTreeSet<String> = BTreeSet::new();
    for target in &normalized {
        if !seen.insert(target.as_path()) {
            duplicates.insert(target.display().to_string());
        }
    }
    if !duplicates.is_empty() {
        return Err(KegError::TargetConflict {
            targets: duplicates.into_iter().collect(),
        });
    }

    Ok(normalized)
}

/// Validate a container path: absolute, no `.`/`..` components, not
/// the container root itself.
fn normalize_target(target: &Path) -> KegResult<PathBuf> {
    let invalid = || KegError::InvalidTarget {
        target: target.display().to_string(),
    };

    if !target.is_absolute() {
        return Err(invalid());
    }

    let mut normalized = PathBuf::new();
    for component in target.components() {
        match component {
            Component::RootDir | Component::Normal(_) => normalized.push(component),
            Component::CurDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(invalid());
            }
        }
    }
    if normalized == Path::new("/") {
        return Err(invalid());
    }

    Ok(normalized)
}

/// Stable topological order: a binding whose target is an ancestor of
/// another's mounts first; unrelated bindings keep declaration order.
fn order_bindings(bindings: Vec<MountBinding>) -> Vec<MountBinding> {
    let n = bindings.len();
    if n <= 1 {
        return bindings;
    }

    // Targets are distinct here, so starts_with means strict ancestry.
    let mut indegree = vec![0usize; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, ancestor) in bindings.iter().enumerate() {
        for (j, descendant) in bindings.iter().enumerate() {
            if i != j && descendant.target.starts_with(&ancestor.target) {
                children[i].push(j);
                indegree[j] += 1;
            }
        }
    }

    // Kahn's algorithm taking the smallest declaration index first.
    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut rank = vec![0usize; n];
    let mut next = 0usize;
    while let Some(Reverse(i)) = ready.pop() {
        rank[i] = next;
        next += 1;
        for &j in &children[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    let mut paired: Vec<(usize, MountBinding)> = bindings.into_iter().enumerate().collect();
    paired.sort_by_key(|(i, _)| rank[*i]);
    paired.into_iter().map(|(_, binding)| binding).collect()
}
