//! ---
//! uah_section: "04-runtime-modules"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Sample node manager publishing product and build information."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use uahost_core::{NodeDefinition, NodeId, NodeManager, NodeManagerConfig, ServerManager};

use crate::namespace::NAMESPACE_INDEX;

/// Standard `Objects` folder of namespace 0.
const OBJECTS_FOLDER: u32 = 85;
const ROOT_NAME: &str = "BuildInfo";

pub struct BuildInfoNodeManager {
    product_name: String,
    product_uri: String,
    software_version: String,
    namespace: Option<Arc<dyn NodeManagerConfig>>,
}

impl BuildInfoNodeManager {
    pub fn new(product_name: impl Into<String>, product_uri: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            product_uri: product_uri.into(),
            software_version: env!("CARGO_PKG_VERSION").to_owned(),
            namespace: None,
        }
    }

    pub fn root_node_id() -> NodeId {
        NodeId::string(NAMESPACE_INDEX, ROOT_NAME)
    }

    fn variable(name: &str, value: impl Into<String>) -> NodeDefinition {
        NodeDefinition::variable(
            NodeId::string(NAMESPACE_INDEX, format!("{ROOT_NAME}.{name}")),
            name,
            value,
        )
        .with_parent(Self::root_node_id())
    }
}

impl NodeManager for BuildInfoNodeManager {
    fn name(&self) -> &str {
        ROOT_NAME
    }

    fn start_up(&mut self, server_manager: &Arc<dyn ServerManager>) -> Result<()> {
        let namespace = server_manager.default_node_manager();
        namespace
            .add_node(
                NodeDefinition::object(Self::root_node_id(), ROOT_NAME)
                    .with_parent(NodeId::numeric(0, OBJECTS_FOLDER)),
            )
            .context("unable to publish build info root")?;
        for node in [
            Self::variable("ProductName", self.product_name.clone()),
            Self::variable("ProductUri", self.product_uri.clone()),
            Self::variable("SoftwareVersion", self.software_version.clone()),
            Self::variable("StartTime", Utc::now().to_rfc3339()),
        ] {
            namespace
                .add_node(node)
                .context("unable to publish build info variable")?;
        }
        info!(
            product = %self.product_name,
            version = %self.software_version,
            "build info published"
        );
        self.namespace = Some(namespace);
        Ok(())
    }

    fn shut_down(&mut self) {
        if let Some(namespace) = self.namespace.take() {
            if let Err(err) = namespace.delete_node(&Self::root_node_id()) {
                warn!(error = %err, "build info nodes were already removed");
            }
        }
    }
}
