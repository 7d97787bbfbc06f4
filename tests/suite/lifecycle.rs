//! End-to-end lifecycle runs against the loopback fake service.
//!
//! Each test wires a real orchestrator to a [`FakeService`] over TCP and
//! asserts on the service's event log: sessions are served sequentially, so
//! the log shows exactly when connections, handshakes, and teardowns
//! happened relative to each other.

use std::fs;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use capstan_engine::OrchestratorHandle;
use capstan_types::{ConfigurationProfile, Selection, StatusUpdate};

use crate::common::{self, FakeService, TestWorkspace};

/// Seed a profile bound to the workspace stub, start the orchestrator, and
/// select the profile.
async fn start_selected(
    fake: &FakeService,
    ws: &TestWorkspace,
) -> (
    OrchestratorHandle,
    watch::Receiver<StatusUpdate>,
    ConfigurationProfile,
    JoinHandle<()>,
) {
    let mut store = common::store_in(ws.dir.path());
    let mut profile = store.add_profile().expect("add profile");
    profile.interpreter_path = ws.interpreter.display().to_string();
    profile.project_path = ws.project.display().to_string();
    store.save(profile.clone()).expect("save profile");

    let (orchestrator, handle, status) =
        common::orchestrator_with(ws.dir.path(), store, common::tcp_host(fake.port));
    let engine = tokio::spawn(orchestrator.run());
    handle
        .select(Selection::Profile(profile.id))
        .await
        .expect("select profile");
    (handle, status, profile, engine)
}

async fn shut_down(handle: &OrchestratorHandle, engine: JoinHandle<()>) {
    handle.shutdown().await.expect("shutdown");
    tokio::time::timeout(Duration::from_secs(5), engine)
        .await
        .expect("engine loop did not exit")
        .expect("engine task panicked");
}

#[tokio::test]
async fn selecting_a_profile_brings_the_service_up() {
    let fake = FakeService::spawn().await;
    let ws = common::test_workspace();
    let (handle, mut status, profile, engine) = start_selected(&fake, &ws).await;

    common::wait_status(&mut status, "running", common::running).await;
    assert_eq!(status.borrow().label, profile.name);
    fake.wait_for("clientReady", 1).await;
    assert_eq!(fake.count("connect").await, 1);

    shut_down(&handle, engine).await;
    fake.wait_for("shutdown", 1).await;
    fake.wait_for("exit", 1).await;
}

#[tokio::test]
async fn auxiliary_path_edit_is_pushed_without_restart() {
    let fake = FakeService::spawn().await;
    let ws = common::test_workspace();
    let (handle, mut status, mut profile, engine) = start_selected(&fake, &ws).await;
    common::wait_status(&mut status, "running", common::running).await;

    let aux = ws.dir.path().join("modules");
    fs::create_dir_all(aux.join("sale_margin")).expect("module dir");
    fs::write(aux.join("sale_margin").join("__manifest__.py"), "{}\n").expect("manifest");
    profile.auxiliary_paths = vec![aux.display().to_string()];
    handle.save_profile(profile).await.expect("save");

    fake.wait_for("configurationChanged", 1).await;
    assert_eq!(fake.count("connect").await, 1);
    assert_eq!(fake.count("shutdown").await, 0);

    shut_down(&handle, engine).await;
}

#[tokio::test]
async fn interpreter_edit_restarts_the_service() {
    let fake = FakeService::spawn().await;
    let ws = common::test_workspace();
    let (handle, mut status, mut profile, engine) = start_selected(&fake, &ws).await;
    common::wait_status(&mut status, "running", common::running).await;

    let second = common::write_interpreter_stub(ws.dir.path(), "python-stub-2", "Python 3.12.1");
    profile.interpreter_path = second.display().to_string();
    handle.save_profile(profile).await.expect("save");

    fake.wait_for("clientReady", 2).await;
    common::wait_status(&mut status, "running after restart", common::running).await;

    // The old session was fully torn down before the new one connected, so
    // at no point were two sessions live.
    let events = fake.events().await;
    let first_close = events.iter().position(|e| e == "close").unwrap();
    let second_connect = events.iter().rposition(|e| e == "connect").unwrap();
    assert!(
        first_close < second_connect,
        "restart overlapped the old session: {events:?}"
    );
    assert_eq!(fake.count("shutdown").await, 1);
    assert_eq!(fake.count("configurationChanged").await, 0);

    shut_down(&handle, engine).await;
}

#[tokio::test]
async fn deleting_the_selected_profile_stops_the_service() {
    let fake = FakeService::spawn().await;
    let ws = common::test_workspace();
    let (handle, mut status, profile, engine) = start_selected(&fake, &ws).await;
    common::wait_status(&mut status, "running", common::running).await;

    handle.delete_profile(profile.id).await.expect("delete");

    common::wait_status(&mut status, "disabled", |u| u.label == "disabled").await;
    fake.wait_for("shutdown", 1).await;
    fake.wait_for("exit", 1).await;
    assert_eq!(fake.count("connect").await, 1);

    shut_down(&handle, engine).await;
}

#[tokio::test]
async fn selecting_disabled_stops_the_service() {
    let fake = FakeService::spawn().await;
    let ws = common::test_workspace();
    let (handle, mut status, _profile, engine) = start_selected(&fake, &ws).await;
    common::wait_status(&mut status, "running", common::running).await;

    handle.select(Selection::Disabled).await.expect("disable");

    common::wait_status(&mut status, "disabled", |u| u.label == "disabled").await;
    fake.wait_for("shutdown", 1).await;

    shut_down(&handle, engine).await;
}

#[tokio::test]
async fn unresponsive_service_is_force_released_within_the_bound() {
    let fake = FakeService::spawn_unresponsive().await;
    let ws = common::test_workspace();
    let (handle, mut status, _profile, engine) = start_selected(&fake, &ws).await;
    common::wait_status(&mut status, "running", common::running).await;

    let begun = Instant::now();
    handle.select(Selection::Disabled).await.expect("disable");
    common::wait_status(&mut status, "disabled", |u| u.label == "disabled").await;

    // Stop timeout is 500ms; the machine must not wait on the wedged
    // service beyond it.
    assert!(
        begun.elapsed() < Duration::from_secs(3),
        "hard stop took {:?}",
        begun.elapsed()
    );
    fake.wait_for("shutdown", 1).await;
    assert_eq!(fake.count("exit").await, 0);

    shut_down(&handle, engine).await;
}

#[tokio::test]
async fn persisted_selection_starts_the_service_on_launch() {
    let fake = FakeService::spawn().await;
    let ws = common::test_workspace();

    let mut store = common::store_in(ws.dir.path());
    let mut profile = store.add_profile().expect("add profile");
    profile.interpreter_path = ws.interpreter.display().to_string();
    profile.project_path = ws.project.display().to_string();
    store.save(profile.clone()).expect("save profile");
    store
        .select(Selection::Profile(profile.id))
        .expect("select");

    let (orchestrator, handle, mut status) =
        common::orchestrator_with(ws.dir.path(), store, common::tcp_host(fake.port));
    let engine = tokio::spawn(orchestrator.run());

    // No event was sent; the loop reconciled the persisted selection.
    common::wait_status(&mut status, "running", common::running).await;
    fake.wait_for("clientReady", 1).await;

    shut_down(&handle, engine).await;
}

#[tokio::test]
async fn failed_validation_never_touches_the_service() {
    let fake = FakeService::spawn().await;
    let ws = common::test_workspace();

    let mut store = common::store_in(ws.dir.path());
    let mut profile = store.add_profile().expect("add profile");
    profile.interpreter_path = common::write_interpreter_stub(
        ws.dir.path(),
        "python-too-old",
        "Python 3.7.2",
    )
    .display()
    .to_string();
    profile.project_path = ws.project.display().to_string();
    store.save(profile.clone()).expect("save profile");

    let (orchestrator, handle, _status) =
        common::orchestrator_with(ws.dir.path(), store, common::tcp_host(fake.port));
    let engine = tokio::spawn(orchestrator.run());

    handle
        .select(Selection::Profile(profile.id))
        .await
        .expect("select");

    shut_down(&handle, engine).await;
    assert_eq!(fake.count("connect").await, 0);
}
