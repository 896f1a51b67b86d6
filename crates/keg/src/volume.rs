//! Volume records and query types.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keg_common::VolumeName;

/// A named, durable storage unit.
///
/// Owned and persisted by the registry; the driver owns everything below
/// `mount_point`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Unique name, across all drivers.
    pub name: VolumeName,
    /// Backend responsible for the storage.
    pub driver: String,
    /// Canonical host location of the data, managed by the driver.
    ///
    /// Stable for the lifetime of the volume while references exist.
    pub mount_point: PathBuf,
    /// Driver options, opaque to the registry.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, String>,
    /// User metadata, no behavioral effect.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Creation time, immutable.
    pub created_at: DateTime<Utc>,
    /// Whether the name was runtime-generated; controls GC eligibility.
    #[serde(default)]
    pub anonymous: bool,
}

impl Volume {
    /// Create a record for freshly allocated storage.
    #[must_use]
    pub fn new(name: VolumeName, driver: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            name,
            driver: driver.into(),
            mount_point: mount_point.into(),
            options: HashMap::new(),
            labels: HashMap::new(),
            created_at: Utc::now(),
            anonymous: false,
        }
    }

    /// Set the driver options.
    #[must_use]
    pub fn with_options(mut self, options: HashMap<String, String>) -> Self {
        self.options = options;
        self
    }

    /// Set the user labels.
    #[must_use]
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Mark the record as anonymous.
    #[must_use]
    pub const fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Whether a request for `driver` with `options` is compatible with
    /// this record.
    ///
    /// Labels are metadata and do not participate in conflict detection.
    #[must_use]
    pub fn same_config(&self, driver: &str, options: &HashMap<String, String>) -> bool {
        self.driver == driver && self.options == *options
    }
}

/// Filter for [`list`](crate::manager::VolumeManager::list) queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeFilter {
    driver: Option<String>,
    labels: Vec<(String, Option<String>)>,
    dangling: Option<bool>,
}

impl VolumeFilter {
    /// Match everything.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Keep only volumes using `driver`.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Keep only volumes carrying the label `key` (any value).
    #[must_use]
    pub fn label(mut self, key: impl Into<String>) -> Self {
        self.labels.push((key.into(), None));
        self
    }

    /// Keep only volumes carrying the label `key` with exactly `value`.
    #[must_use]
    pub fn label_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), Some(value.into())));
        self
    }

    /// Keep only dangling (`true`) or referenced (`false`) volumes.
    #[must_use]
    pub const fn dangling(mut self, dangling: bool) -> Self {
        self.dangling = Some(dangling);
        self
    }

    /// Whether `volume` passes this filter.
    ///
    /// `is_dangling` is supplied by the caller from the reference tracker;
    /// the record itself does not know its usage.
    #[must_use]
    pub fn matches(&self, volume: &Volume, is_dangling: bool) -> bool {
        if let Some(driver) = &self.driver {
            if volume.driver != *driver {
                return false;
            }
        }
        for (key, value) in &self.labels {
            match (volume.labels.get(key), value) {
                (None, _) => return false,
                (Some(_), None) => {}
                (Some(actual), Some(expected)) => {
                    if actual != expected {
                        return false;
                    }
                }
            }
        }
        if let Some(dangling) = self.dangling {
            if is_dangling != dangling {
                return false;
            }
        }
        true
    }
}

/// A volume record together with its live usage, as returned by inspect.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeDetails {
    /// The registry record.
    pub volume: Volume,
    /// Number of distinct containers currently referencing the volume.
    pub ref_count: usize,
    /// The referencing container identifiers, sorted.
    pub holders: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(name: &str) -> Volume {
        Volume::new(
            VolumeName::new(name).unwrap(),
            "local",
            format!("/var/lib/keg/volumes/{name}/_data"),
        )
    }

    #[test]
    fn config_comparison_ignores_labels() {
        let mut labels = HashMap::new();
        labels.insert("env".to_string(), "prod".to_string());
        let vol = volume("db").with_labels(labels);

        assert!(vol.same_config("local", &HashMap::new()));
        assert!(!vol.same_config("nfs", &HashMap::new()));

        let mut options = HashMap::new();
        options.insert("uid".to_string(), "1000".to_string());
        assert!(!vol.same_config("local", &options));
    }

    #[test]
    fn filter_by_driver_and_label() {
        let mut labels = HashMap::new();
        labels.insert("env".to_string(), "prod".to_string());
        let vol = volume("db").with_labels(labels);

        assert!(VolumeFilter::any().matches(&vol, true));
        assert!(VolumeFilter::any().driver("local").matches(&vol, true));
        assert!(!VolumeFilter::any().driver("nfs").matches(&vol, true));
        assert!(VolumeFilter::any().label("env").matches(&vol, true));
        assert!(VolumeFilter::any().label_value("env", "prod").matches(&vol, true));
        assert!(!VolumeFilter::any().label_value("env", "dev").matches(&vol, true));
        assert!(!VolumeFilter::any().label("team").matches(&vol, true));
    }

    #[test]
    fn filter_by_dangling() {
        let vol = volume("db");
        assert!(VolumeFilter::any().dangling(true).matches(&vol, true));
        assert!(!VolumeFilter::any().dangling(true).matches(&vol, false));
        assert!(VolumeFilter::any().dangling(false).matches(&vol, false));
    }

    #[test]
    fn record_round_trips_through_json() {
        let vol = volume("db").anonymous();
        let json = serde_json::to_string_pretty(&vol).unwrap();
        let back: Volume = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vol);
        assert!(back.anonymous);
    }
}
