//! ---
//! uah_section: "01-core-lifecycle"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Crate root for the UA-Host lifecycle orchestrator."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
pub mod auth;
pub mod config_adapter;
pub mod error;
pub mod modules;
pub mod orchestrator;
pub mod registry;
pub mod types;

pub use auth::{
    decide_logon, AuthCallback, AuthHandle, DefaultAuthCallback, GenericSession, LogonDecision,
    Session, UserIdentityToken, UserTokenKind,
};
pub use config_adapter::{ConfigProvider, FileServerConfig};
pub use error::{LifecycleError, NodeManagerFailure};
pub use modules::{
    ModuleFactory, NodeManager, NodeManagerConfig, ProtocolModule, ProtocolStack, RuntimeModule,
    ServerManager,
};
pub use orchestrator::{
    ConfigurationSummary, LifecycleOrchestrator, ServerState, StartReport, StopReport,
};
pub use registry::{NodeManagerId, NodeManagerRegistry};
pub use types::{Identifier, NodeDefinition, NodeId, NodeKind};
