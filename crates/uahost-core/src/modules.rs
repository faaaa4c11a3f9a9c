//! ---
//! uah_section: "01-core-lifecycle"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Collaborator traits implemented by runtime, protocol and node-manager modules."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
//! The orchestrator only sees these seams. Fallible hooks return [`anyhow::Result`] so
//! module implementations can attach whatever context they need.
use std::sync::Arc;

use anyhow::Result;
use uahost_common::LocalizedText;
use url::Url;

use crate::config_adapter::ConfigProvider;
use crate::types::{NodeDefinition, NodeId};

/// Live handle to the running server, produced by a started [`RuntimeModule`].
pub trait ServerManager: Send + Sync {
    /// Announce a shutdown to connected clients.
    ///
    /// Returns the number of clients connected at the time of the call.
    fn start_server_shutdown(&self, seconds_till_shutdown: u32, reason: &LocalizedText) -> usize;

    /// The namespace-1 node manager owned by the runtime.
    fn default_node_manager(&self) -> Arc<dyn NodeManagerConfig>;
}

/// Address space editing surface of a node manager.
pub trait NodeManagerConfig: Send + Sync {
    fn namespace_index(&self) -> u16;
    fn add_node(&self, node: NodeDefinition) -> Result<()>;
    fn delete_node(&self, node_id: &NodeId) -> Result<()>;
    fn node_count(&self) -> usize;
}

/// Network transport opened by a [`ProtocolModule`].
pub trait ProtocolStack: Send {
    fn name(&self) -> &str;
    fn open(&mut self, endpoints: &[Url]) -> Result<()>;
    fn close(&mut self);
}

/// Request dispatch backbone ("core module").
pub trait RuntimeModule: Send {
    fn initialize(&mut self) -> Result<()>;
    fn start_up(&mut self, config: Arc<dyn ConfigProvider>) -> Result<()>;
    fn shut_down(&mut self);
    /// Available once [`RuntimeModule::start_up`] succeeded.
    fn server_manager(&self) -> Option<Arc<dyn ServerManager>>;
}

/// Network listeners layered on top of a [`RuntimeModule`].
pub trait ProtocolModule: Send {
    /// `stack` is the pre-built stack supplied by the configuration, if any.
    fn initialize(
        &mut self,
        config: &dyn ConfigProvider,
        stack: Option<Box<dyn ProtocolStack>>,
    ) -> Result<()>;
    fn start_up(&mut self, runtime: &dyn RuntimeModule) -> Result<()>;
    fn shut_down(&mut self);
}

/// Pluggable data-model provider.
pub trait NodeManager: Send {
    fn name(&self) -> &str;
    fn start_up(&mut self, server_manager: &Arc<dyn ServerManager>) -> Result<()>;
    fn shut_down(&mut self);
}

/// Builds fresh module instances for every start.
pub trait ModuleFactory: Send + Sync {
    fn create_runtime(&self) -> Box<dyn RuntimeModule>;
    fn create_protocol(&self) -> Box<dyn ProtocolModule>;
}
