//! Volume reference tracking.
//!
//! Records which containers currently use which volumes. The tracker is a
//! derived cache, not durable state: it is rebuilt at startup from the
//! supervisor's enumeration of live containers, and consulted before any
//! volume removal.

use std::collections::BTreeSet;

use dashmap::DashMap;

/// Per-volume container reference sets.
#[derive(Debug, Default)]
pub struct ReferenceTracker {
    entries: DashMap<String, BTreeSet<String>>,
}

impl ReferenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `container` uses `volume`.
    ///
    /// Idempotent: acquiring an already-held pair is a no-op. Returns
    /// whether the reference is new.
    pub fn acquire(&self, volume: &str, container: &str) -> bool {
        let inserted = self
            .entries
            .entry(volume.to_string())
            .or_default()
            .insert(container.to_string());
        if inserted {
            tracing::debug!(volume = %volume, container = %container, "Reference acquired");
        }
        inserted
    }

    /// Drop the reference `container` holds on `volume`.
    ///
    /// Idempotent: releasing an absent pair is a no-op, tolerating
    /// out-of-order cleanup during crash recovery. Returns whether an
    /// entry was removed.
    pub fn release(&self, volume: &str, container: &str) -> bool {
        let removed = {
            // Guard dropped before the empty-set sweep below.
            match self.entries.get_mut(volume) {
                Some(mut holders) => holders.remove(container),
                None => false,
            }
        };
        if removed {
            self.entries.remove_if(volume, |_, holders| holders.is_empty());
            tracing::debug!(volume = %volume, container = %container, "Reference released");
        }
        removed
    }

    /// Number of distinct containers holding `volume`.
    #[must_use]
    pub fn count(&self, volume: &str) -> usize {
        self.entries.get(volume).map_or(0, |holders| holders.len())
    }

    /// Whether `volume` has no references.
    #[must_use]
    pub fn is_dangling(&self, volume: &str) -> bool {
        self.count(volume) == 0
    }

    /// The containers holding `volume`, sorted.
    #[must_use]
    pub fn holders(&self, volume: &str) -> Vec<String> {
        self.entries
            .get(volume)
            .map_or_else(Vec::new, |holders| holders.iter().cloned().collect())
    }

    /// The volumes `container` currently holds, sorted.
    #[must_use]
    pub fn volumes_held_by(&self, container: &str) -> Vec<String> {
        let mut volumes: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().contains(container))
            .map(|entry| entry.key().clone())
            .collect();
        volumes.sort();
        volumes
    }

    /// Release every reference held by `container`, returning the
    /// affected volume names, sorted.
    pub fn release_all(&self, container: &str) -> Vec<String> {
        let volumes = self.volumes_held_by(container);
        for volume in &volumes {
            self.release(volume, container);
        }
        volumes
    }

    /// Forget all references to `volume`.
    ///
    /// Used after a forced removal so stale holders do not linger.
    pub fn clear(&self, volume: &str) {
        self.entries.remove(volume);
    }

    /// Replace all state from the supervisor's live-container
    /// enumeration.
    pub fn rebuild<I>(&self, live: I)
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        self.entries.clear();
        let mut containers = 0usize;
        for (container, volumes) in live {
            containers += 1;
            for volume in volumes {
                self.acquire(&volume, &container);
            }
        }
        tracing::debug!(containers, "Rebuilt reference tracker");
    }
}
