//! ---
//! uah_section: "04-runtime-modules"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Module factory producing the reference runtime and protocol modules."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::sync::Arc;

use uahost_core::{ModuleFactory, ProtocolModule, RuntimeModule};

use crate::protocol::LocalProtocolModule;
use crate::runtime::{LocalRuntimeModule, ServerSlot};
use crate::server::LocalServerManager;

/// Builds [`LocalRuntimeModule`] and [`LocalProtocolModule`] instances.
///
/// Clones share the handle to the server manager of the runtime currently running,
/// which lets an embedding application drive sessions against it.
#[derive(Clone, Default)]
pub struct LocalModuleFactory {
    server: ServerSlot,
}

impl LocalModuleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self) -> Option<Arc<LocalServerManager>> {
        self.server.lock().clone()
    }
}

impl ModuleFactory for LocalModuleFactory {
    fn create_runtime(&self) -> Box<dyn RuntimeModule> {
        Box::new(LocalRuntimeModule::with_slot(self.server.clone()))
    }

    fn create_protocol(&self) -> Box<dyn ProtocolModule> {
        Box::new(LocalProtocolModule::new())
    }
}
