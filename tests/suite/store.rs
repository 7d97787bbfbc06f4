//! Store persistence across host restarts.

use std::fs;
use std::time::Duration;

use capstan_config::SCHEMA_VERSION;
use capstan_types::Selection;

use crate::common;

#[tokio::test]
async fn edits_made_through_the_engine_survive_a_host_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let project = dir.path().join("srv");
    fs::create_dir_all(&project).expect("project dir");
    fs::write(
        project.join("release.py"),
        "version_info = (17, 0, 0, FINAL, 0, '')\n",
    )
    .expect("version marker");

    let store = common::store_in(dir.path());
    let (orchestrator, handle, _status) =
        common::orchestrator_with(dir.path(), store, common::tcp_host(1));
    let engine = tokio::spawn(orchestrator.run());

    let mut profile = handle.add_profile().await.expect("add profile");
    profile.name = "prod".to_string();
    profile.project_path = project.display().to_string();
    handle.save_profile(profile.clone()).await.expect("save");

    handle.shutdown().await.expect("shutdown");
    tokio::time::timeout(Duration::from_secs(5), engine)
        .await
        .expect("engine loop did not exit")
        .expect("engine task panicked");

    // A fresh host sees the edit, including the resolved project fields the
    // engine computed at save time.
    let reopened = common::store_in(dir.path());
    assert_eq!(reopened.schema_version(), SCHEMA_VERSION);
    assert_eq!(reopened.selection(), Selection::Disabled);
    let saved = reopened.profile(profile.id).expect("profile persisted");
    assert_eq!(saved.name, "prod");
    assert_eq!(saved.resolved_project_path.as_deref(), Some(project.as_path()));
    assert_eq!(saved.resolved_version.as_deref(), Some("17.0.0"));
}

#[tokio::test]
async fn profile_ids_keep_climbing_across_restarts() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut store = common::store_in(dir.path());
    let first = store.add_profile().expect("add");
    store.delete(first.id).expect("delete");
    drop(store);

    let mut reopened = common::store_in(dir.path());
    let second = reopened.add_profile().expect("add after reopen");
    assert!(second.id > first.id, "id {} was reused", second.id);
}
