//! ---
//! uah_section: "04-runtime-modules"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "In-process reference modules for the lifecycle orchestrator."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
//! Reference runtime for UA-Host: a local server manager with a namespace-1 node store,
//! a protocol module backed by a loopback stack, and a sample node manager.

pub mod build_info;
pub mod factory;
pub mod namespace;
pub mod protocol;
pub mod runtime;
pub mod server;

pub use build_info::BuildInfoNodeManager;
pub use factory::LocalModuleFactory;
pub use namespace::{Namespace1Store, NAMESPACE_INDEX};
pub use protocol::{LocalProtocolModule, LoopbackStack};
pub use runtime::LocalRuntimeModule;
pub use server::{LocalServerManager, ShutdownNotice};
