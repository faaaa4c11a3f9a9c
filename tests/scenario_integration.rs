//! ---
//! uah_section: "06-testing"
//! uah_subsection: "integration-tests"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "End-to-end server scenarios using on-disk settings and the local runtime."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uahost_common::{init_tracing, LocalizedText, LoggingConfig};
use uahost_core::{
    LifecycleError, LifecycleOrchestrator, NodeDefinition, NodeId, ServerState, UserIdentityToken,
};
use uahost_rt::{BuildInfoNodeManager, LocalModuleFactory};
use uahost_testharness::{Journal, RecordingNodeManager};

const INI: &str = r#"
[server]
uri = urn:[ApplicationPath]:scenario
name_1 = en|Scenario Server

[endpoints]
rejected_certificate_dir = [ApplicationPath]/pki/rejected
url_1 = opc.tcp://localhost:48010
url_2 = opc.tcp://localhost:48011

[identity]
anonymous_allowed = true
username_password_allowed = false
"#;

const TRACED_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ServerConfig>
  <server>
    <uri>urn:uahost:traced</uri>
    <name locale="en">Traced Server</name>
  </server>
  <trace>
    <server_enabled>true</server_enabled>
    <server_level>4</server_level>
    <stack_enabled>true</stack_enabled>
    <stack_level>4</stack_level>
    <max_backup_files>2</max_backup_files>
    <file>[ApplicationPath]/log/server.log</file>
  </trace>
  <endpoints>
    <url>opc.tcp://localhost:48020</url>
  </endpoints>
</ServerConfig>
"#;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write settings file");
    path
}

fn reason() -> LocalizedText {
    LocalizedText::new("en", "Server shut down")
}

fn local_orchestrator(dir: &Path, file: &str) -> (Arc<LocalModuleFactory>, LifecycleOrchestrator) {
    let factory = Arc::new(LocalModuleFactory::new());
    let orchestrator = LifecycleOrchestrator::new(factory.clone());
    orchestrator
        .configure_file(
            dir.join(file).to_string_lossy(),
            dir.to_string_lossy(),
        )
        .expect("record configuration file");
    (factory, orchestrator)
}

#[test]
fn ini_configured_server_runs_and_restarts() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "server.ini", INI);
    let (factory, orchestrator) = local_orchestrator(dir.path(), "server.ini");
    orchestrator
        .add_node_manager(Box::new(BuildInfoNodeManager::new("UA-Host", "urn:uahost:product")))
        .expect("register build info");

    let report = orchestrator.start().expect("server starts");
    assert_eq!(orchestrator.state(), ServerState::Running);
    assert_eq!(
        report.endpoints,
        vec!["opc.tcp://localhost:48010", "opc.tcp://localhost:48011"]
    );
    let banner = report.to_string();
    assert!(banner.contains("     opc.tcp://localhost:48011"));
    assert!(factory.server().is_some());

    let namespace = orchestrator.default_node_manager().expect("running");
    assert_eq!(namespace.node_count(), 5, "build info nodes are published");
    namespace
        .add_node(NodeDefinition::object(NodeId::string(1, "Line1"), "Line1"))
        .expect("add node");
    assert_eq!(namespace.node_count(), 6);

    orchestrator.stop(0, &reason()).expect("stop");
    assert_eq!(orchestrator.node_manager_count(), 0);
    assert!(factory.server().is_none());

    orchestrator
        .start()
        .expect("the recorded file is loaded again on restart");
    let namespace = orchestrator.default_node_manager().expect("running");
    assert_eq!(namespace.node_count(), 0, "fresh runtime, fresh address space");
}

#[test]
fn unsupported_extension_is_a_missing_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "bad.unknownext", INI);
    let (factory, orchestrator) = local_orchestrator(dir.path(), "bad.unknownext");

    let err = orchestrator.start().expect_err("extension not supported");
    assert!(matches!(err, LifecycleError::ConfigurationMissing { .. }));
    assert_eq!(orchestrator.state(), ServerState::Stopped);
    assert!(factory.server().is_none());
}

#[test]
fn start_without_configuration_fails() {
    let orchestrator = LifecycleOrchestrator::new(Arc::new(LocalModuleFactory::new()));
    assert!(matches!(
        orchestrator.start(),
        Err(LifecycleError::ConfigurationMissing { .. })
    ));
}

#[test]
fn unreadable_settings_fail_to_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_factory, orchestrator) = local_orchestrator(dir.path(), "absent.ini");
    assert!(matches!(
        orchestrator.start(),
        Err(LifecycleError::ConfigurationLoadFailed(_))
    ));

    write(
        dir.path(),
        "absent.ini",
        "[server]\nuri = urn:x\n\n[endpoints]\nurl_1 = http://localhost:80\n",
    );
    let err = orchestrator.start().expect_err("only opc.tcp endpoints");
    assert!(matches!(err, LifecycleError::ProtocolInitFailed(_)));
}

#[test]
fn stop_waits_for_connected_clients() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "server.ini", INI);
    let (factory, orchestrator) = local_orchestrator(dir.path(), "server.ini");
    orchestrator.start().expect("start");

    let server = factory.server().expect("server published");
    server
        .open_session(1, NodeId::random_guid(1))
        .expect("session opens");
    assert!(server
        .activate_session(1, &UserIdentityToken::anonymous())
        .expect("session exists")
        .is_accepted());
    assert_eq!(server.connected_clients(), 1);

    let began = Instant::now();
    let stopped = orchestrator.stop(1, &reason()).expect("stop");
    let elapsed = began.elapsed();

    assert!(elapsed >= Duration::from_secs(1), "drained for {elapsed:?}");
    assert_eq!(stopped.connected_clients, 1);
    assert_eq!(stopped.drain, Duration::from_secs(1));
    let notice = server.shutdown_notice().expect("clients were notified");
    assert_eq!(notice.seconds_till_shutdown, 1);
    assert_eq!(notice.reason, reason());
    assert_eq!(server.session_count(), 0, "sessions closed with the runtime");
}

#[test]
fn stop_without_clients_does_not_wait() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "server.ini", INI);
    let (_factory, orchestrator) = local_orchestrator(dir.path(), "server.ini");
    orchestrator.start().expect("start");

    let began = Instant::now();
    let stopped = orchestrator.stop(30, &reason()).expect("stop");
    assert!(began.elapsed() < Duration::from_secs(5));
    assert_eq!(stopped.connected_clients, 0);
    assert!(stopped.drain.is_zero());
}

#[test]
fn stopping_state_is_visible_during_the_drain() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "server.ini", INI);
    let (factory, orchestrator) = local_orchestrator(dir.path(), "server.ini");
    let orchestrator = Arc::new(orchestrator);
    orchestrator.start().expect("start");

    let server = factory.server().expect("server published");
    server.open_session(7, NodeId::numeric(1, 7)).expect("session");
    server
        .activate_session(7, &UserIdentityToken::anonymous())
        .expect("activate");

    let stopper = orchestrator.clone();
    let handle = thread::spawn(move || stopper.stop(1, &reason()));

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut observed = false;
    while Instant::now() < deadline {
        if orchestrator.state() == ServerState::Stopping && server.shutdown_notice().is_some() {
            observed = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(observed, "state never reported stopping");
    assert!(
        server.open_session(8, NodeId::numeric(1, 8)).is_err(),
        "new sessions are refused once shutdown is announced"
    );

    handle
        .join()
        .expect("stop thread")
        .expect("stop succeeds");
    assert_eq!(orchestrator.state(), ServerState::Stopped);
}

#[test]
fn control_calls_wait_for_an_in_flight_stop() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "server.ini", INI);
    let (factory, orchestrator) = local_orchestrator(dir.path(), "server.ini");
    let journal = Journal::new();
    orchestrator.start().expect("start");

    let server = factory.server().expect("server published");
    server.open_session(3, NodeId::numeric(1, 3)).expect("session");
    server
        .activate_session(3, &UserIdentityToken::anonymous())
        .expect("activate");

    let drain = Duration::from_secs(1);
    let began = Instant::now();
    thread::scope(|scope| {
        let stopper = scope.spawn(|| orchestrator.stop(1, &reason()));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !(orchestrator.state() == ServerState::Stopping
            && server.shutdown_notice().is_some())
        {
            assert!(Instant::now() < deadline, "state never reported stopping");
            thread::sleep(Duration::from_millis(5));
        }

        let adder = scope.spawn(|| {
            let added = orchestrator
                .add_node_manager(RecordingNodeManager::new("late", &journal).boxed());
            (added, began.elapsed(), orchestrator.state())
        });
        let starter = scope.spawn(|| {
            let started = orchestrator.start();
            (started, began.elapsed(), orchestrator.state())
        });

        stopper
            .join()
            .expect("stop thread")
            .expect("stop succeeds");

        let (added, elapsed, state) = adder.join().expect("add thread");
        added.expect("late manager registered");
        assert!(elapsed >= drain, "add returned during the drain after {elapsed:?}");
        assert_ne!(state, ServerState::Stopping);

        let (started, elapsed, state) = starter.join().expect("start thread");
        started.expect("start after the drain");
        assert!(elapsed >= drain, "start returned during the drain after {elapsed:?}");
        assert_eq!(state, ServerState::Running);
    });

    assert_eq!(orchestrator.state(), ServerState::Running);
    assert_eq!(
        orchestrator.node_manager_count(),
        1,
        "the late manager lives in the registry rebuilt by stop"
    );
    assert!(journal.contains("nm.late.start"));
    assert!(!journal.contains("nm.late.shutdown"));
    orchestrator.stop(0, &reason()).expect("stop");
    assert!(journal.ordered("nm.late.shutdown", "nm.late.drop"));
}

#[test]
fn dropping_a_running_server_releases_the_runtime() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "server.ini", INI);
    let (factory, orchestrator) = local_orchestrator(dir.path(), "server.ini");
    orchestrator.start().expect("start");
    let server = factory.server().expect("server published");

    drop(orchestrator);

    assert!(factory.server().is_none());
    let notice = server.shutdown_notice().expect("shutdown announced");
    assert_eq!(notice.seconds_till_shutdown, 0);
    assert_eq!(notice.reason.text, "Application shut down");
}

#[test]
fn xml_configuration_enables_the_server_trace() {
    init_tracing("uahost-scenarios", &LoggingConfig::default()).expect("tracing initialised");
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "ServerConfig.xml", TRACED_XML);
    let (_factory, orchestrator) = local_orchestrator(dir.path(), "ServerConfig.xml");

    let summary = orchestrator.check_configuration().expect("xml loads");
    assert_eq!(summary.server_uri, "urn:uahost:traced");
    assert_eq!(summary.endpoints, vec!["opc.tcp://localhost:48020"]);
    let expected = dir.path().join("log").join("server.log");
    assert_eq!(summary.server_trace_file.as_deref(), Some(expected.as_path()));
    assert_eq!(orchestrator.state(), ServerState::Stopped);

    orchestrator.start().expect("start");
    assert_eq!(orchestrator.server_trace_file(), Some(expected));
    assert!(dir.path().join("log").is_dir());
    orchestrator.stop(0, &reason()).expect("stop");
}
