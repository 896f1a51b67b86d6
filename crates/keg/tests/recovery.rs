//! Crash-consistency and restart behavior.

use std::path::Path;

use keg::{BindSpec, CreateVolume, KegConfig, KegPaths};
use tempfile::tempdir;

fn manager(root: &Path) -> keg::VolumeManager {
    keg::VolumeManager::new(KegConfig::default().with_root(root)).unwrap()
}

#[test_log::test(tokio::test)]
async fn registry_survives_restart() {
    let temp = tempdir().unwrap();

    {
        let manager = manager(temp.path());
        let volume = manager
            .create(CreateVolume::named("v1").label("env", "prod"))
            .await
            .unwrap();
        std::fs::write(volume.mount_point.join("data.txt"), b"payload").unwrap();
    }

    let manager = manager(temp.path());
    let details = manager.inspect("v1").unwrap();
    assert_eq!(
        details.volume.labels.get("env").map(String::as_str),
        Some("prod")
    );
    assert!(details.volume.mount_point.join("data.txt").exists());
}

#[test_log::test(tokio::test)]
async fn corrupt_record_does_not_block_startup() {
    let temp = tempdir().unwrap();
    let paths = KegPaths::with_root(temp.path());

    {
        let manager = manager(temp.path());
        manager.create(CreateVolume::named("good")).await.unwrap();
    }

    // A torn write from a crashed process.
    std::fs::write(paths.record("torn"), b"{\"name\": \"torn\", \"dri").unwrap();

    let manager = manager(temp.path());
    assert!(manager.inspect("good").is_ok());
    assert!(manager.inspect("torn").is_err());
}

#[test_log::test(tokio::test)]
async fn interrupted_creation_is_retryable() {
    let temp = tempdir().unwrap();
    let paths = KegPaths::with_root(temp.path());

    // Simulate a crash between the driver create and the record write:
    // backing storage exists, no record does.
    let orphan = paths.volume_data("v1");
    std::fs::create_dir_all(&orphan).unwrap();
    std::fs::write(orphan.join("partial.txt"), b"left over").unwrap();

    let manager = manager(temp.path());
    assert!(manager.inspect("v1").is_err());

    // The retry reuses the storage instead of erroring.
    let volume = manager.create(CreateVolume::named("v1")).await.unwrap();
    assert_eq!(volume.mount_point, orphan);
    assert!(volume.mount_point.join("partial.txt").exists());
}

#[test_log::test(tokio::test)]
async fn reference_state_is_rebuilt_from_the_supervisor() {
    let temp = tempdir().unwrap();

    {
        let manager = manager(temp.path());
        for name in ["v1", "v2"] {
            manager.create(CreateVolume::named(name)).await.unwrap();
        }
        manager
            .resolve_mounts("c1", &[BindSpec::volume("v1", "/data")], None)
            .await
            .unwrap();
    }

    let manager = manager(temp.path());

    // Fresh process: counts start at zero until the supervisor reports.
    assert_eq!(manager.inspect("v1").unwrap().ref_count, 0);

    manager.restore(vec![(
        "c1".to_string(),
        vec!["v1".to_string(), "v2".to_string()],
    )]);
    assert_eq!(manager.inspect("v1").unwrap().ref_count, 1);
    assert_eq!(manager.inspect("v2").unwrap().ref_count, 1);

    // The rebuilt state drives removal safety as usual.
    assert!(manager.remove("v1", false).await.is_err());
    manager.container_removed("c1").await;
    assert!(manager.remove("v1", false).await.is_ok());
}
