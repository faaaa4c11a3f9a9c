//! ---
//! uah_section: "06-testing"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Scripted runtime, protocol, server-manager and node-manager modules."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use uahost_common::LocalizedText;
use uahost_core::{
    ConfigProvider, ModuleFactory, NodeManager, NodeManagerConfig, ProtocolModule, ProtocolStack,
    RuntimeModule, ServerManager,
};
use uahost_rt::Namespace1Store;

use crate::journal::{FaultPlan, FaultPoint, Journal};

/// Server manager with a scripted number of connected clients.
pub struct ScriptedServerManager {
    journal: Journal,
    connected_clients: AtomicUsize,
    namespace: Arc<Namespace1Store>,
    last_shutdown: Mutex<Option<(u32, LocalizedText)>>,
}

impl ScriptedServerManager {
    fn new(journal: Journal) -> Self {
        Self {
            journal,
            connected_clients: AtomicUsize::new(0),
            namespace: Arc::new(Namespace1Store::new()),
            last_shutdown: Mutex::new(None),
        }
    }

    pub fn set_connected_clients(&self, clients: usize) {
        self.connected_clients.store(clients, Ordering::SeqCst);
    }

    pub fn last_shutdown(&self) -> Option<(u32, LocalizedText)> {
        self.last_shutdown.lock().clone()
    }
}

impl ServerManager for ScriptedServerManager {
    fn start_server_shutdown(&self, seconds_till_shutdown: u32, reason: &LocalizedText) -> usize {
        self.journal
            .record(format!("server.shutdown_notice {seconds_till_shutdown}"));
        *self.last_shutdown.lock() = Some((seconds_till_shutdown, reason.clone()));
        self.connected_clients.load(Ordering::SeqCst)
    }

    fn default_node_manager(&self) -> Arc<dyn NodeManagerConfig> {
        self.namespace.clone()
    }
}

/// Factory whose modules record every hook into a [`Journal`] and fail on armed
/// [`FaultPoint`]s.
pub struct ScriptedFactory {
    journal: Journal,
    faults: FaultPlan,
    server: Arc<ScriptedServerManager>,
    runtimes_created: Arc<AtomicUsize>,
    protocols_created: Arc<AtomicUsize>,
    opened_stacks: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new(journal: Journal, faults: FaultPlan) -> Self {
        Self {
            server: Arc::new(ScriptedServerManager::new(journal.clone())),
            journal,
            faults,
            runtimes_created: Arc::default(),
            protocols_created: Arc::default(),
            opened_stacks: Arc::default(),
        }
    }

    /// Server manager handed out by every runtime of this factory.
    pub fn server_manager(&self) -> Arc<ScriptedServerManager> {
        self.server.clone()
    }

    pub fn runtimes_created(&self) -> usize {
        self.runtimes_created.load(Ordering::SeqCst)
    }

    pub fn protocols_created(&self) -> usize {
        self.protocols_created.load(Ordering::SeqCst)
    }

    /// Names of injected protocol stacks opened by protocol modules.
    pub fn opened_stacks(&self) -> Vec<String> {
        self.opened_stacks.lock().clone()
    }
}

impl ModuleFactory for ScriptedFactory {
    fn create_runtime(&self) -> Box<dyn RuntimeModule> {
        self.runtimes_created.fetch_add(1, Ordering::SeqCst);
        self.journal.record("runtime.create");
        Box::new(ScriptedRuntime {
            journal: self.journal.clone(),
            faults: self.faults.clone(),
            server: self.server.clone(),
            started: false,
        })
    }

    fn create_protocol(&self) -> Box<dyn ProtocolModule> {
        self.protocols_created.fetch_add(1, Ordering::SeqCst);
        self.journal.record("protocol.create");
        Box::new(ScriptedProtocol {
            journal: self.journal.clone(),
            faults: self.faults.clone(),
            stack: None,
            opened_stacks: self.opened_stacks.clone(),
        })
    }
}

struct ScriptedRuntime {
    journal: Journal,
    faults: FaultPlan,
    server: Arc<ScriptedServerManager>,
    started: bool,
}

impl RuntimeModule for ScriptedRuntime {
    fn initialize(&mut self) -> Result<()> {
        self.journal.record("runtime.initialize");
        self.faults.check(FaultPoint::RuntimeInit)
    }

    fn start_up(&mut self, _config: Arc<dyn ConfigProvider>) -> Result<()> {
        self.journal.record("runtime.start");
        self.faults.check(FaultPoint::RuntimeStart)?;
        self.started = true;
        Ok(())
    }

    fn shut_down(&mut self) {
        self.journal.record("runtime.shutdown");
        self.started = false;
    }

    fn server_manager(&self) -> Option<Arc<dyn ServerManager>> {
        if !self.started || self.faults.is_armed(FaultPoint::RuntimeWithoutServer) {
            return None;
        }
        Some(self.server.clone())
    }
}

impl Drop for ScriptedRuntime {
    fn drop(&mut self) {
        self.journal.record("runtime.drop");
    }
}

struct ScriptedProtocol {
    journal: Journal,
    faults: FaultPlan,
    stack: Option<Box<dyn ProtocolStack>>,
    opened_stacks: Arc<Mutex<Vec<String>>>,
}

impl ProtocolModule for ScriptedProtocol {
    fn initialize(
        &mut self,
        _config: &dyn ConfigProvider,
        stack: Option<Box<dyn ProtocolStack>>,
    ) -> Result<()> {
        self.journal.record(if stack.is_some() {
            "protocol.initialize injected"
        } else {
            "protocol.initialize"
        });
        self.stack = stack;
        self.faults.check(FaultPoint::ProtocolInit)
    }

    fn start_up(&mut self, runtime: &dyn RuntimeModule) -> Result<()> {
        self.journal.record("protocol.start");
        if runtime.server_manager().is_none() {
            bail!("protocol started against a runtime without server manager");
        }
        self.faults.check(FaultPoint::ProtocolStart)?;
        if let Some(stack) = self.stack.as_mut() {
            stack.open(&[])?;
            self.opened_stacks.lock().push(stack.name().to_owned());
        }
        Ok(())
    }

    fn shut_down(&mut self) {
        self.journal.record("protocol.shutdown");
        if let Some(stack) = self.stack.as_mut() {
            stack.close();
        }
    }
}

impl Drop for ScriptedProtocol {
    fn drop(&mut self) {
        self.journal.record("protocol.drop");
    }
}

/// Node manager that journals its hooks under `nm.<name>.*`.
pub struct RecordingNodeManager {
    name: String,
    journal: Journal,
    fail_start: bool,
}

impl RecordingNodeManager {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            journal: journal.clone(),
            fail_start: false,
        }
    }

    pub fn failing(name: impl Into<String>, journal: &Journal) -> Self {
        let mut manager = Self::new(name, journal);
        manager.fail_start = true;
        manager
    }

    pub fn boxed(self) -> Box<dyn NodeManager> {
        Box::new(self)
    }
}

impl NodeManager for RecordingNodeManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_up(&mut self, server_manager: &Arc<dyn ServerManager>) -> Result<()> {
        self.journal.record(format!("nm.{}.start", self.name));
        if self.fail_start {
            bail!("node manager {} refused to start", self.name);
        }
        let namespace = server_manager.default_node_manager();
        self.journal.record(format!(
            "nm.{}.namespace {}",
            self.name,
            namespace.namespace_index()
        ));
        Ok(())
    }

    fn shut_down(&mut self) {
        self.journal.record(format!("nm.{}.shutdown", self.name));
    }
}

impl Drop for RecordingNodeManager {
    fn drop(&mut self) {
        self.journal.record(format!("nm.{}.drop", self.name));
    }
}
