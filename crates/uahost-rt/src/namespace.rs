//! ---
//! uah_section: "04-runtime-modules"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Namespace-1 node store backing the default node manager."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use anyhow::{bail, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;
use uahost_core::{NodeDefinition, NodeId, NodeManagerConfig};

pub const NAMESPACE_INDEX: u16 = 1;

/// Insertion-ordered node table of namespace 1.
///
/// Parents in other namespaces (e.g. the standard `Objects` folder) are accepted
/// as-is; parents inside namespace 1 must already exist.
#[derive(Debug, Default)]
pub struct Namespace1Store {
    nodes: RwLock<IndexMap<NodeId, NodeDefinition>>,
}

impl Namespace1Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<NodeDefinition> {
        self.nodes.read().get(node_id).cloned()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.read().keys().cloned().collect()
    }

    pub fn children(&self, parent: &NodeId) -> Vec<NodeId> {
        self.nodes
            .read()
            .values()
            .filter(|node| node.parent.as_ref() == Some(parent))
            .map(|node| node.node_id.clone())
            .collect()
    }
}

impl NodeManagerConfig for Namespace1Store {
    fn namespace_index(&self) -> u16 {
        NAMESPACE_INDEX
    }

    fn add_node(&self, node: NodeDefinition) -> Result<()> {
        if node.node_id.namespace != NAMESPACE_INDEX {
            bail!(
                "node {} does not belong to namespace {NAMESPACE_INDEX}",
                node.node_id
            );
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.node_id) {
            bail!("node {} already exists", node.node_id);
        }
        if let Some(parent) = &node.parent {
            if parent.namespace == NAMESPACE_INDEX && !nodes.contains_key(parent) {
                bail!("parent {parent} of node {} does not exist", node.node_id);
            }
        }
        debug!(node_id = %node.node_id, browse_name = %node.browse_name, "node added");
        nodes.insert(node.node_id.clone(), node);
        Ok(())
    }

    /// Removes the node together with all of its descendants.
    fn delete_node(&self, node_id: &NodeId) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.shift_remove(node_id).is_none() {
            bail!("node {node_id} does not exist");
        }
        let mut orphans = vec![node_id.clone()];
        while let Some(parent) = orphans.pop() {
            let children: Vec<NodeId> = nodes
                .values()
                .filter(|node| node.parent.as_ref() == Some(&parent))
                .map(|node| node.node_id.clone())
                .collect();
            for child in children {
                nodes.shift_remove(&child);
                orphans.push(child);
            }
        }
        debug!(node_id = %node_id, remaining = nodes.len(), "node deleted");
        Ok(())
    }

    fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str) -> NodeDefinition {
        NodeDefinition::object(NodeId::string(NAMESPACE_INDEX, name), name)
    }

    #[test]
    fn duplicates_and_unknown_parents_are_rejected() {
        let store = Namespace1Store::new();
        store.add_node(folder("Pumps")).expect("first add");
        assert!(store.add_node(folder("Pumps")).is_err());

        let orphan = NodeDefinition::variable(NodeId::string(1, "Pumps.Speed"), "Speed", "0")
            .with_parent(NodeId::string(1, "Valves"));
        assert!(store.add_node(orphan).is_err());

        let foreign = NodeDefinition::object(NodeId::numeric(2, 10), "Foreign");
        assert!(store.add_node(foreign).is_err());
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn deleting_a_parent_removes_descendants() {
        let store = Namespace1Store::new();
        let objects_folder = NodeId::numeric(0, 85);
        store
            .add_node(folder("Plant").with_parent(objects_folder))
            .expect("plant");
        store
            .add_node(folder("Pump").with_parent(NodeId::string(1, "Plant")))
            .expect("pump");
        store
            .add_node(
                NodeDefinition::variable(NodeId::string(1, "Pump.Speed"), "Speed", "42")
                    .with_parent(NodeId::string(1, "Pump")),
            )
            .expect("speed");
        store.add_node(folder("Other")).expect("other");
        assert_eq!(store.children(&NodeId::string(1, "Plant")).len(), 1);

        store
            .delete_node(&NodeId::string(1, "Plant"))
            .expect("delete plant");
        assert_eq!(store.node_ids(), vec![NodeId::string(1, "Other")]);
        assert!(store.delete_node(&NodeId::string(1, "Plant")).is_err());
    }
}
