//! ---
//! uah_section: "06-testing"
//! uah_subsection: "integration-tests"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Startup ordering, rollback and shutdown tests against scripted modules."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::sync::Arc;

use uahost_common::LocalizedText;
use uahost_core::{
    AuthCallback, AuthHandle, LifecycleError, NodeDefinition, NodeId, ServerState,
};
use uahost_testharness::{FaultPoint, Harness, RecordingNodeManager, ScriptedAuthCallback};

fn reason() -> LocalizedText {
    LocalizedText::new("en", "maintenance")
}

#[test]
fn start_and_stop_run_every_hook_in_order() {
    let harness = Harness::configured();
    harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::new("alpha", &harness.journal).boxed())
        .expect("register alpha");

    let report = harness.orchestrator.start().expect("start succeeds");
    assert_eq!(harness.orchestrator.state(), ServerState::Running);
    assert_eq!(report.endpoints, vec!["opc.tcp://localhost:4840"]);
    assert!(report.node_manager_failures.is_empty());
    assert_eq!(
        harness.journal.entries(),
        vec![
            "config.load",
            "runtime.create",
            "runtime.initialize",
            "config.create_protocol_stack",
            "protocol.create",
            "protocol.initialize",
            "runtime.start",
            "config.start",
            "nm.alpha.start",
            "nm.alpha.namespace 1",
            "protocol.start",
        ]
    );

    harness.journal.clear();
    let stopped = harness.orchestrator.stop(0, &reason()).expect("stop succeeds");
    assert_eq!(stopped.connected_clients, 0);
    assert_eq!(harness.orchestrator.state(), ServerState::Stopped);
    assert_eq!(
        harness.journal.entries(),
        vec![
            "server.shutdown_notice 0",
            "protocol.shutdown",
            "protocol.drop",
            "runtime.shutdown",
            "runtime.drop",
            "nm.alpha.shutdown",
            "nm.alpha.drop",
            "config.shutdown",
            "config.drop",
        ]
    );
    assert_eq!(harness.orchestrator.node_manager_count(), 0);
}

#[test]
fn control_operations_are_rejected_outside_their_states() {
    let harness = Harness::configured();
    let err = harness
        .orchestrator
        .stop(0, &reason())
        .expect_err("stop requires running");
    assert!(matches!(err, LifecycleError::NotRunning));
    assert!(harness.journal.entries().is_empty());

    harness.orchestrator.start().expect("start");
    let created = harness.factory.runtimes_created();

    assert!(matches!(
        harness.orchestrator.start(),
        Err(LifecycleError::AlreadyStarted)
    ));
    assert!(matches!(
        harness.orchestrator.configure_file("server.ini", "/srv"),
        Err(LifecycleError::AlreadyStarted)
    ));
    assert!(matches!(
        harness
            .orchestrator
            .configure_provider(harness.scripted_config().boxed()),
        Err(LifecycleError::AlreadyStarted)
    ));
    assert!(matches!(
        harness.orchestrator.check_configuration(),
        Err(LifecycleError::AlreadyStarted)
    ));
    assert_eq!(harness.factory.runtimes_created(), created);
    assert_eq!(harness.orchestrator.state(), ServerState::Running);
}

#[test]
fn runtime_init_failure_creates_nothing_else() {
    let harness = Harness::configured();
    harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::new("alpha", &harness.journal).boxed())
        .expect("register alpha");
    harness.faults.arm(FaultPoint::RuntimeInit);

    let err = harness.orchestrator.start().expect_err("runtime init fails");
    assert!(matches!(err, LifecycleError::RuntimeInitFailed(_)));
    assert_eq!(harness.orchestrator.state(), ServerState::Stopped);
    assert_eq!(harness.factory.protocols_created(), 0);
    assert!(harness.journal.contains("runtime.drop"));
    assert!(!harness.journal.contains("config.start"));
    assert!(!harness.journal.contains("nm.alpha.start"));
    assert_eq!(harness.orchestrator.node_manager_count(), 1);

    harness.faults.disarm_all();
    harness.orchestrator.start().expect("retry succeeds");
    assert_eq!(harness.journal.count("config.load"), 2);
    assert_eq!(harness.factory.runtimes_created(), 2);
}

#[test]
fn protocol_init_failure_destroys_runtime() {
    let harness = Harness::configured();
    harness.faults.arm(FaultPoint::ProtocolInit);

    let err = harness.orchestrator.start().expect_err("protocol init fails");
    assert!(matches!(err, LifecycleError::ProtocolInitFailed(_)));
    assert!(harness.journal.contains("protocol.drop"));
    assert!(harness.journal.contains("runtime.drop"));
    assert!(!harness.journal.contains("runtime.start"));
    assert!(!harness.journal.contains("runtime.shutdown"));
    assert_eq!(harness.orchestrator.state(), ServerState::Stopped);
}

#[test]
fn runtime_start_failure_destroys_both_modules() {
    let harness = Harness::configured();
    harness.faults.arm(FaultPoint::RuntimeStart);

    let err = harness.orchestrator.start().expect_err("runtime start fails");
    assert!(matches!(err, LifecycleError::RuntimeStartFailed(_)));
    assert!(harness.journal.ordered("protocol.drop", "runtime.drop"));
    assert!(!harness.journal.contains("runtime.shutdown"));
    assert!(!harness.journal.contains("config.start"));
}

#[test]
fn runtime_without_server_manager_is_a_start_failure() {
    let harness = Harness::configured();
    harness.faults.arm(FaultPoint::RuntimeWithoutServer);

    let err = harness.orchestrator.start().expect_err("no server manager");
    assert!(matches!(err, LifecycleError::RuntimeStartFailed(_)));
    assert!(err.to_string().contains("server manager"));
    assert!(harness.journal.ordered("runtime.shutdown", "runtime.drop"));
    assert!(!harness.journal.contains("config.start"));
}

#[test]
fn config_start_failure_keeps_the_configuration() {
    let harness = Harness::configured();
    harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::new("alpha", &harness.journal).boxed())
        .expect("register alpha");
    harness.faults.arm(FaultPoint::ConfigStart);

    let err = harness.orchestrator.start().expect_err("config start fails");
    assert!(matches!(err, LifecycleError::ConfigStartFailed(_)));
    assert!(harness.journal.ordered("runtime.shutdown", "runtime.drop"));
    assert!(harness.journal.contains("protocol.drop"));
    assert!(!harness.journal.contains("protocol.shutdown"));
    assert!(!harness.journal.contains("config.shutdown"));
    assert!(!harness.journal.contains("config.drop"));
    assert!(!harness.journal.contains("nm.alpha.start"));

    harness.faults.disarm_all();
    harness.orchestrator.start().expect("configuration is reused");
}

#[test]
fn protocol_start_failure_rolls_back_everything() {
    let harness = Harness::configured();
    harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::new("alpha", &harness.journal).boxed())
        .expect("register alpha");
    harness.faults.arm(FaultPoint::ProtocolStart);

    let err = harness.orchestrator.start().expect_err("protocol start fails");
    assert!(matches!(err, LifecycleError::ProtocolStartFailed(_)));
    assert_eq!(harness.orchestrator.state(), ServerState::Stopped);

    let entries = harness.journal.entries();
    let rollback: Vec<&str> = entries
        .iter()
        .skip_while(|entry| *entry != "protocol.start")
        .skip(1)
        .map(String::as_str)
        .collect();
    assert_eq!(
        rollback,
        vec![
            "protocol.shutdown",
            "protocol.drop",
            "runtime.shutdown",
            "runtime.drop",
            "nm.alpha.shutdown",
            "config.shutdown",
            "config.drop",
        ]
    );
    assert_eq!(
        harness.orchestrator.node_manager_count(),
        1,
        "node managers stay registered after rollback"
    );

    harness.faults.disarm_all();
    let err = harness
        .orchestrator
        .start()
        .expect_err("the released provider is gone");
    assert!(matches!(err, LifecycleError::ConfigurationMissing { .. }));
}

#[test]
fn failing_node_manager_does_not_block_running() {
    let harness = Harness::configured();
    for manager in [
        RecordingNodeManager::new("alpha", &harness.journal),
        RecordingNodeManager::failing("beta", &harness.journal),
        RecordingNodeManager::new("gamma", &harness.journal),
    ] {
        harness
            .orchestrator
            .add_node_manager(manager.boxed())
            .expect("register");
    }

    let report = harness.orchestrator.start().expect("start succeeds");
    assert_eq!(harness.orchestrator.state(), ServerState::Running);
    assert_eq!(report.node_manager_failures.len(), 1);
    assert_eq!(report.node_manager_failures[0].name, "beta");
    assert!(harness.journal.ordered("nm.beta.start", "nm.gamma.start"));

    harness.orchestrator.stop(0, &reason()).expect("stop");
    assert!(harness.journal.ordered("nm.beta.shutdown", "nm.beta.drop"));
    assert!(harness.journal.ordered("nm.alpha.shutdown", "nm.beta.shutdown"));
    assert_eq!(harness.orchestrator.node_manager_count(), 0);
}

#[test]
fn node_managers_added_while_running_start_immediately() {
    let harness = Harness::configured();
    harness.orchestrator.start().expect("start");

    harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::new("delta", &harness.journal).boxed())
        .expect("late manager starts");
    assert!(harness.journal.contains("nm.delta.start"));

    let err = harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::failing("broken", &harness.journal).boxed())
        .expect_err("late failure is reported");
    match err {
        LifecycleError::NodeManagerStartFailed { name, .. } => assert_eq!(name, "broken"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.orchestrator.state(), ServerState::Running);
    assert_eq!(harness.orchestrator.node_manager_count(), 2);

    harness.orchestrator.stop(0, &reason()).expect("stop");
    assert!(harness.journal.contains("nm.delta.shutdown"));
    assert!(harness.journal.ordered("nm.broken.shutdown", "nm.broken.drop"));
}

#[test]
fn restart_after_stop_builds_fresh_modules() {
    let harness = Harness::configured();
    harness.orchestrator.start().expect("first start");
    harness.orchestrator.stop(0, &reason()).expect("stop");

    harness
        .orchestrator
        .configure_provider(harness.scripted_config().boxed())
        .expect("reconfigure after stop");
    harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::new("alpha", &harness.journal).boxed())
        .expect("register alpha");
    harness.orchestrator.start().expect("second start");

    assert_eq!(harness.factory.runtimes_created(), 2);
    assert_eq!(harness.factory.protocols_created(), 2);
    assert_eq!(harness.orchestrator.node_manager_count(), 1);
    assert_eq!(harness.orchestrator.state(), ServerState::Running);
}

#[test]
fn default_node_manager_requires_running() {
    let harness = Harness::configured();
    assert!(matches!(
        harness.orchestrator.default_node_manager(),
        Err(LifecycleError::NotRunning)
    ));

    harness.orchestrator.start().expect("start");
    let namespace = harness
        .orchestrator
        .default_node_manager()
        .expect("available while running");
    assert_eq!(namespace.namespace_index(), 1);
    namespace
        .add_node(NodeDefinition::object(NodeId::string(1, "Plant"), "Plant"))
        .expect("add node");
    assert_eq!(namespace.node_count(), 1);

    harness.orchestrator.stop(0, &reason()).expect("stop");
    assert!(matches!(
        harness.orchestrator.default_node_manager(),
        Err(LifecycleError::NotRunning)
    ));
}

#[test]
fn last_configuration_call_wins() {
    let harness = Harness::new();
    harness
        .orchestrator
        .configure_file("missing.ini", "/srv")
        .expect("record file");
    harness
        .orchestrator
        .configure_provider(harness.scripted_config().boxed())
        .expect("install provider");
    harness.orchestrator.start().expect("provider pre-empts the file");
    harness.orchestrator.stop(0, &reason()).expect("stop");

    harness
        .orchestrator
        .configure_provider(harness.scripted_config().boxed())
        .expect("install provider");
    harness.journal.clear();
    harness
        .orchestrator
        .configure_file("bad.unknownext", "/srv")
        .expect("record file");
    assert!(harness.journal.contains("config.drop"), "replaced provider is released");
    assert!(matches!(
        harness.orchestrator.start(),
        Err(LifecycleError::ConfigurationMissing { .. })
    ));
}

#[test]
fn check_configuration_loads_without_starting() {
    let harness = Harness::configured();
    let summary = harness
        .orchestrator
        .check_configuration()
        .expect("configuration loads");
    assert_eq!(summary.server_uri, "urn:uahost:scripted");
    assert_eq!(summary.endpoints, vec!["opc.tcp://localhost:4840"]);
    assert!(summary.anonymous_allowed);
    assert_eq!(harness.factory.runtimes_created(), 0);
    assert_eq!(harness.orchestrator.state(), ServerState::Stopped);

    harness.faults.arm(FaultPoint::ConfigLoad);
    assert!(matches!(
        harness.orchestrator.check_configuration(),
        Err(LifecycleError::ConfigurationLoadFailed(_))
    ));
    assert!(matches!(
        harness.orchestrator.start(),
        Err(LifecycleError::ConfigurationLoadFailed(_))
    ));
    assert_eq!(harness.factory.runtimes_created(), 0);
}

#[test]
fn stop_reports_connected_clients_to_the_server_manager() {
    let harness = Harness::configured();
    harness.orchestrator.start().expect("start");

    let stopped = harness.orchestrator.stop(7, &reason()).expect("stop");
    assert_eq!(stopped.connected_clients, 0);
    assert!(stopped.drain.is_zero(), "no clients, no drain");
    assert_eq!(stopped.reason, reason());
    assert_eq!(
        harness.server_manager().last_shutdown(),
        Some((7, reason()))
    );
}

#[test]
fn dropping_a_running_orchestrator_shuts_everything_down() {
    let harness = Harness::configured();
    harness
        .orchestrator
        .add_node_manager(RecordingNodeManager::new("alpha", &harness.journal).boxed())
        .expect("register alpha");
    harness.orchestrator.start().expect("start");
    let journal = harness.journal.clone();
    let server = harness.server_manager();

    drop(harness.orchestrator);

    assert!(journal.contains("server.shutdown_notice 0"));
    assert!(journal.ordered("protocol.shutdown", "runtime.shutdown"));
    assert!(journal.ordered("nm.alpha.shutdown", "config.shutdown"));
    assert!(journal.contains("config.drop"));
    assert_eq!(
        server.last_shutdown(),
        Some((0, LocalizedText::new("en", "Application shut down")))
    );
}

#[test]
fn protocol_stack_supplied_by_the_auth_callback_is_used() {
    let harness = Harness::new();
    let callback: Arc<dyn AuthCallback> =
        Arc::new(ScriptedAuthCallback::new().with_stack("injected"));
    let auth = AuthHandle::new();
    auth.install(&callback);
    harness
        .orchestrator
        .configure_provider(harness.scripted_config().with_auth(auth).boxed())
        .expect("install provider");

    harness.orchestrator.start().expect("start");
    assert!(harness.journal.ordered("config.create_protocol_stack", "protocol.initialize injected"));
    assert_eq!(harness.factory.opened_stacks(), vec!["injected"]);
}
