//! Durable volume record storage.
//!
//! One JSON record per volume under the registry directory. Writes go
//! through a temp file in the same directory followed by an atomic
//! rename, with file and directory fsyncs, so a crash mid-write can
//! never leave a partial record in place of a complete one.

use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use keg_common::{KegError, KegResult};

use crate::volume::Volume;

/// File-per-record volume store.
#[derive(Debug)]
pub struct VolumeStore {
    dir: PathBuf,
}

impl VolumeStore {
    /// Open (creating if needed) the store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> KegResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the record file for `name`.
    #[must_use]
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Durably write (or replace) the record for `volume`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any write/sync step fails;
    /// on failure the previous record, if any, is still intact.
    pub fn save(&self, volume: &Volume) -> KegResult<()> {
        let path = self.record_path(volume.name.as_str());
        let json = serde_json::to_string_pretty(volume)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| KegError::Io(e.error))?;
        self.sync_dir()?;

        tracing::debug!(
            volume = %volume.name,
            path = %path.display(),
            "Saved volume record"
        );
        Ok(())
    }

    /// Delete the record for `name`. Deleting an absent record is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlink or directory sync fails.
    pub fn delete(&self, name: &str) -> KegResult<()> {
        let path = self.record_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.sync_dir()?;
                tracing::debug!(volume = %name, path = %path.display(), "Deleted volume record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every record in the store.
    ///
    /// Unreadable or unparsable records are skipped with a warning so
    /// one corrupt file cannot take the whole registry down.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory itself cannot be read.
    pub fn load_all(&self) -> KegResult<Vec<Volume>> {
        let mut volumes = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match std::fs::read_to_string(&path)
                .map_err(KegError::from)
                .and_then(|json| serde_json::from_str::<Volume>(&json).map_err(KegError::from))
            {
                Ok(volume) => volumes.push(volume),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping corrupt volume record"
                    );
                }
            }
        }

        tracing::debug!(count = volumes.len(), "Loaded volume records");
        Ok(volumes)
    }

    fn sync_dir(&self) -> std::io::Result<()> {
        std::fs::File::open(&self.dir)?.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keg_common::VolumeName;
    use tempfile::tempdir;

    fn volume(name: &str) -> Volume {
        Volume::new(
            VolumeName::new(name).unwrap(),
            "local",
            format!("/var/lib/keg/volumes/{name}/_data"),
        )
    }

    #[test]
    fn save_and_load() {
        let temp = tempdir().unwrap();
        let store = VolumeStore::open(temp.path()).unwrap();

        store.save(&volume("v1")).unwrap();
        store.save(&volume("v2")).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|v| v.name.as_str() == "v1"));
    }

    #[test]
    fn save_replaces_existing_record() {
        let temp = tempdir().unwrap();
        let store = VolumeStore::open(temp.path()).unwrap();

        store.save(&volume("v1")).unwrap();
        let mut updated = volume("v1");
        updated
            .labels
            .insert("env".to_string(), "prod".to_string());
        store.save(&updated).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].labels.get("env").map(String::as_str),
            Some("prod")
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = VolumeStore::open(temp.path()).unwrap();

        store.save(&volume("v1")).unwrap();
        store.delete("v1").unwrap();
        store.delete("v1").unwrap();

        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn corrupt_record_is_skipped() {
        let temp = tempdir().unwrap();
        let store = VolumeStore::open(temp.path()).unwrap();

        store.save(&volume("good")).unwrap();
        std::fs::write(temp.path().join("bad.json"), b"{ not json").unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name.as_str(), "good");
    }
}
