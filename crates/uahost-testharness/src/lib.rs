//! ---
//! uah_section: "06-testing"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Test harness exports for scripted lifecycle scenarios."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
//! Scripted collaborators for exercising the lifecycle orchestrator.
//!
//! Every scripted module writes to a shared [`Journal`] so tests can assert on the
//! exact call order, and consults a shared [`FaultPlan`] to fail on demand.

pub mod config;
pub mod journal;
pub mod modules;

use std::sync::Arc;

use uahost_core::LifecycleOrchestrator;

pub use config::{InjectedStack, ScriptedAuthCallback, ScriptedConfig};
pub use journal::{FaultPlan, FaultPoint, Journal};
pub use modules::{RecordingNodeManager, ScriptedFactory, ScriptedServerManager};

/// An orchestrator wired to a [`ScriptedFactory`], with its journal and fault plan.
pub struct Harness {
    pub journal: Journal,
    pub faults: FaultPlan,
    pub factory: Arc<ScriptedFactory>,
    pub orchestrator: LifecycleOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::new();
        let faults = FaultPlan::new();
        let factory = Arc::new(ScriptedFactory::new(journal.clone(), faults.clone()));
        let orchestrator = LifecycleOrchestrator::new(factory.clone());
        Self {
            journal,
            faults,
            factory,
            orchestrator,
        }
    }

    /// A harness with a [`ScriptedConfig`] already installed.
    pub fn configured() -> Self {
        let harness = Self::new();
        let config = harness.scripted_config();
        harness
            .orchestrator
            .configure_provider(config.boxed())
            .expect("fresh orchestrator accepts configuration");
        harness
    }

    pub fn scripted_config(&self) -> ScriptedConfig {
        ScriptedConfig::new(&self.journal, &self.faults)
    }

    pub fn server_manager(&self) -> Arc<ScriptedServerManager> {
        self.factory.server_manager()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
