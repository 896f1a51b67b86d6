//! Mount resolution semantics through the public surface.

use std::path::Path;

use keg::{
    BindSpec, Consistency, KegConfig, KegError, MountMode, VolumeFilter, VolumeManager,
};
use tempfile::tempdir;

fn manager(root: &Path) -> VolumeManager {
    VolumeManager::new(KegConfig::default().with_root(root)).unwrap()
}

fn targets(bindings: &[keg::MountBinding]) -> Vec<&Path> {
    bindings.iter().map(|b| b.target.as_path()).collect()
}

#[tokio::test]
async fn ancestor_mounts_before_descendant_regardless_of_declaration() {
    let temp = tempdir().unwrap();
    let manager = manager(temp.path());

    let declared = vec![
        BindSpec::volume("app", "/app"),
        BindSpec::volume("nm", "/app/node_modules"),
    ];
    let reversed = vec![
        BindSpec::volume("nm", "/app/node_modules"),
        BindSpec::volume("app", "/app"),
    ];

    let expected = vec![Path::new("/app"), Path::new("/app/node_modules")];
    let bindings = manager.resolve_mounts("c1", &declared, None).await.unwrap();
    assert_eq!(targets(&bindings), expected);

    let bindings = manager.resolve_mounts("c2", &reversed, None).await.unwrap();
    assert_eq!(targets(&bindings), expected);
}

#[tokio::test]
async fn nesting_chains_order_outermost_first() {
    let temp = tempdir().unwrap();
    let manager = manager(temp.path());

    let specs = vec![
        BindSpec::volume("c", "/srv/app/data/cache"),
        BindSpec::volume("a", "/srv/app"),
        BindSpec::volume("z", "/zzz"),
        BindSpec::volume("b", "/srv/app/data"),
    ];
    let bindings = manager.resolve_mounts("c1", &specs, None).await.unwrap();

    // "/zzz" keeps its declared position relative to the bindings it is
    // unrelated to; the chain itself goes outermost first.
    assert_eq!(
        targets(&bindings),
        vec![
            Path::new("/srv/app"),
            Path::new("/zzz"),
            Path::new("/srv/app/data"),
            Path::new("/srv/app/data/cache"),
        ]
    );
}

#[tokio::test]
async fn duplicate_targets_fail_with_zero_bindings() {
    let temp = tempdir().unwrap();
    let manager = manager(temp.path());

    let specs = vec![
        BindSpec::volume("v1", "/data"),
        BindSpec::volume("v2", "/data"),
    ];
    let err = manager.resolve_mounts("c1", &specs, None).await.unwrap_err();

    match err {
        KegError::TargetConflict { targets } => assert_eq!(targets, vec!["/data".to_string()]),
        other => panic!("expected TargetConflict, got {other:?}"),
    }

    // The failed request left nothing behind.
    assert!(manager.list(&VolumeFilter::any()).is_empty());
    assert!(manager.inspect("v1").is_err());
}

#[tokio::test]
async fn short_syntax_resolves_end_to_end() {
    let temp = tempdir().unwrap();
    let host_dir = tempdir().unwrap();
    let manager = manager(temp.path());

    let specs = vec![
        "appdata:/var/lib/app".parse::<BindSpec>().unwrap(),
        format!("{}:/etc/app:ro,cached", host_dir.path().display())
            .parse::<BindSpec>()
            .unwrap(),
        "/tmp/scratch".parse::<BindSpec>().unwrap(),
    ];
    let bindings = manager.resolve_mounts("c1", &specs, None).await.unwrap();
    assert_eq!(bindings.len(), 3);

    let volume = &bindings[0];
    assert_eq!(volume.volume.as_ref().unwrap().as_str(), "appdata");
    assert_eq!(volume.mode, MountMode::ReadWrite);

    let bind = &bindings[1];
    assert_eq!(bind.volume, None);
    assert_eq!(bind.mode, MountMode::ReadOnly);
    assert_eq!(bind.consistency, Consistency::Cached);
    assert_eq!(bind.host_path, host_dir.path());

    let anonymous = &bindings[2];
    assert_eq!(anonymous.target, Path::new("/tmp/scratch"));
    let name = anonymous.volume.as_ref().unwrap();
    assert!(manager.inspect(name.as_str()).unwrap().volume.anonymous);
}

#[tokio::test]
async fn read_only_and_hints_are_carried_onto_bindings() {
    let temp = tempdir().unwrap();
    let manager = manager(temp.path());

    let specs = vec![
        BindSpec::volume("conf", "/etc/conf")
            .read_only()
            .consistency(Consistency::Delegated),
    ];
    let bindings = manager.resolve_mounts("c1", &specs, None).await.unwrap();

    assert_eq!(bindings[0].mode, MountMode::ReadOnly);
    assert!(bindings[0].mode.is_read_only());
    assert_eq!(bindings[0].consistency, Consistency::Delegated);
}

#[tokio::test]
async fn missing_bind_source_fails_with_driver_identity() {
    let temp = tempdir().unwrap();
    let manager = manager(temp.path());

    let specs = vec![BindSpec::bind("/definitely/not/here", "/data")];
    let err = manager.resolve_mounts("c1", &specs, None).await.unwrap_err();

    match err {
        KegError::Driver { driver, volume, .. } => {
            assert_eq!(driver, "bind");
            assert_eq!(volume, "/definitely/not/here");
        }
        other => panic!("expected Driver error, got {other:?}"),
    }
}

#[tokio::test]
async fn bindings_are_not_persisted() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_path_buf();

    {
        let manager = manager(&root);
        manager
            .resolve_mounts("c1", &[BindSpec::volume("v1", "/data")], None)
            .await
            .unwrap();
    }

    // After a restart the volume record is back, the binding and its
    // reference are not.
    let manager = manager(&root);
    let details = manager.inspect("v1").unwrap();
    assert_eq!(details.ref_count, 0);
    assert!(details.holders.is_empty());
}
