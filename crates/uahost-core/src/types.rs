//! ---
//! uah_section: "01-core-lifecycle"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Address space value types shared with external modules."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Uuid),
}

/// Address space node identifier, qualified by namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn guid(namespace: u16, value: Uuid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(value),
        }
    }

    /// A random GUID node id, as used for session authentication tokens.
    pub fn random_guid(namespace: u16) -> Self {
        Self::guid(namespace, Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Numeric(value) => write!(f, "ns={};i={}", self.namespace, value),
            Identifier::String(value) => write!(f, "ns={};s={}", self.namespace, value),
            Identifier::Guid(value) => write!(f, "ns={};g={}", self.namespace, value),
        }
    }
}

/// Node class of a [`NodeDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Object,
    Variable,
}

/// Node added through a [`crate::modules::NodeManagerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub node_id: NodeId,
    pub browse_name: String,
    pub kind: NodeKind,
    /// Parent node; `None` places the node below the namespace root folder.
    pub parent: Option<NodeId>,
    /// Initial value for variables, rendered as text.
    pub value: Option<String>,
}

impl NodeDefinition {
    pub fn object(node_id: NodeId, browse_name: impl Into<String>) -> Self {
        Self {
            node_id,
            browse_name: browse_name.into(),
            kind: NodeKind::Object,
            parent: None,
            value: None,
        }
    }

    pub fn variable(node_id: NodeId, browse_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            node_id,
            browse_name: browse_name.into(),
            kind: NodeKind::Variable,
            parent: None,
            value: Some(value.into()),
        }
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }
}
