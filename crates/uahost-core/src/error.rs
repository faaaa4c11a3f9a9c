//! ---
//! uah_section: "01-core-lifecycle"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Lifecycle error taxonomy."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use serde::Serialize;
use thiserror::Error;

use crate::registry::NodeManagerId;

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Failures reported by [`crate::LifecycleOrchestrator`] operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("server is already started")]
    AlreadyStarted,
    #[error("server is not running")]
    NotRunning,
    #[error("no usable server configuration: {reason}")]
    ConfigurationMissing { reason: String },
    #[error("failed to load server configuration: {0}")]
    ConfigurationLoadFailed(#[source] anyhow::Error),
    #[error("failed to initialize runtime module: {0}")]
    RuntimeInitFailed(#[source] anyhow::Error),
    #[error("failed to start runtime module: {0}")]
    RuntimeStartFailed(#[source] anyhow::Error),
    #[error("failed to initialize protocol module: {0}")]
    ProtocolInitFailed(#[source] anyhow::Error),
    #[error("failed to start protocol module: {0}")]
    ProtocolStartFailed(#[source] anyhow::Error),
    #[error("failed to start configuration: {0}")]
    ConfigStartFailed(#[source] anyhow::Error),
    #[error("node manager '{name}' failed to start: {source}")]
    NodeManagerStartFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Non-fatal node manager startup failure collected during `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeManagerFailure {
    pub id: NodeManagerId,
    pub name: String,
    pub message: String,
}
