//! ---
//! uah_section: "01-core-lifecycle"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Insertion-ordered node manager registry with per-manager run state."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::NodeManagerFailure;
use crate::modules::{NodeManager, ServerManager};

/// Registration sequence number of a node manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeManagerId(u64);

impl NodeManagerId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nm-{}", self.0)
    }
}

struct RegisteredNodeManager {
    id: NodeManagerId,
    manager: Box<dyn NodeManager>,
    running: bool,
}

impl RegisteredNodeManager {
    fn start(&mut self, server_manager: &Arc<dyn ServerManager>) -> anyhow::Result<()> {
        self.manager.start_up(server_manager)?;
        self.running = true;
        debug!(node_manager = %self.manager.name(), id = %self.id, "node manager started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.manager.shut_down();
            self.running = false;
            debug!(node_manager = %self.manager.name(), id = %self.id, "node manager stopped");
        }
    }

    /// A failed `start_up` may have acquired resources, so release runs the hook regardless.
    fn release(&mut self) {
        self.manager.shut_down();
        self.running = false;
        debug!(node_manager = %self.manager.name(), id = %self.id, "node manager released");
    }
}

/// Node managers owned by the orchestrator, kept in registration order.
#[derive(Default)]
pub struct NodeManagerRegistry {
    entries: Vec<RegisteredNodeManager>,
    next_id: u64,
}

impl NodeManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, manager: Box<dyn NodeManager>) -> NodeManagerId {
        self.next_id += 1;
        let id = NodeManagerId(self.next_id);
        info!(node_manager = %manager.name(), %id, "node manager registered");
        self.entries.push(RegisteredNodeManager {
            id,
            manager,
            running: false,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.manager.name().to_owned())
            .collect()
    }

    pub fn is_running(&self, id: NodeManagerId) -> Option<bool> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.running)
    }

    /// Start a single manager, e.g. one added while the server is running.
    pub fn start(
        &mut self,
        id: NodeManagerId,
        server_manager: &Arc<dyn ServerManager>,
    ) -> anyhow::Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| anyhow::anyhow!("node manager {id} is not registered"))?;
        entry.start(server_manager)
    }

    /// Attempt to start every manager that is not running yet.
    ///
    /// Failures are logged and collected; they never stop the remaining managers.
    pub fn start_all(&mut self, server_manager: &Arc<dyn ServerManager>) -> Vec<NodeManagerFailure> {
        let mut failures = Vec::new();
        for entry in self.entries.iter_mut().filter(|entry| !entry.running) {
            if let Err(err) = entry.start(server_manager) {
                error!(
                    node_manager = %entry.manager.name(),
                    id = %entry.id,
                    error = %format!("{err:#}"),
                    "node manager failed to start"
                );
                failures.push(NodeManagerFailure {
                    id: entry.id,
                    name: entry.manager.name().to_owned(),
                    message: format!("{err:#}"),
                });
            }
        }
        failures
    }

    /// Shut down running managers but keep them registered. Used by startup rollback.
    pub fn shut_down_running(&mut self) {
        for entry in &mut self.entries {
            entry.stop();
        }
    }

    /// Shut down every manager, started or not, and release every registration.
    pub fn shut_down_all(&mut self) {
        for entry in &mut self.entries {
            entry.release();
        }
        let released = self.entries.len();
        self.entries.clear();
        debug!(released, "node manager registry cleared");
    }
}

impl fmt::Debug for NodeManagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|entry| (entry.id, entry.manager.name(), entry.running)),
            )
            .finish()
    }
}
