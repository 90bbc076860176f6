//! Tree (de)serialization
//!
//! A [`SerializableActor`] mirrors an [`ActorTree`] at rest: the same
//! parent/child shape, laid out as a depth-first arena of [`FrozenNode`]s.
//! It is the only form in which actors cross the store boundary.
//!
//! Freezing and thawing go through one session per call. The
//! [`FreezeSession`] numbers every node before any step is frozen, so a step
//! can embed a [`NodeRef`] to any other node of its tree; the
//! [`ThawSession`] resolves those references against the rebuilt arena.

use super::catalog::StepCatalog;
use super::context::{Checkpoint, NodeContext};
use super::tree::{ActorTree, NodeId};
use super::{Step, TreeError};
use peerloom_core::{Address, AddressError, MessageType, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors while freezing or thawing a tree.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("no step registered for kind {0:?}")]
    UnknownStepKind(String),

    #[error("no shortcircuit registered for kind {0:?}")]
    UnknownShortcircuitKind(String),

    #[error("state of kind {kind:?} could not be encoded or decoded: {source}")]
    State {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("node reference {0} does not point into this tree")]
    DanglingReference(usize),

    #[error("address {0} is not part of this tree")]
    UnknownAddress(String),

    #[error("malformed tree: {0}")]
    Malformed(String),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("address error: {0}")]
    Address(#[from] AddressError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize any step or hook state into its frozen form.
pub fn freeze_state<T: Serialize>(state: &T) -> Result<serde_json::Value, SerializationError> {
    Ok(serde_json::to_value(state)?)
}

/// Reference to a node of the same tree, stable across freeze and thaw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRef(usize);

impl NodeRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Shared state of one freeze call.
#[derive(Debug)]
pub struct FreezeSession {
    index_of: HashMap<Address, usize>,
}

impl FreezeSession {
    /// Reference to the node at `address`.
    pub fn node_ref(&self, address: &Address) -> Result<NodeRef, SerializationError> {
        self.index_of
            .get(address)
            .copied()
            .map(NodeRef)
            .ok_or_else(|| SerializationError::UnknownAddress(address.to_string()))
    }

    pub fn len(&self) -> usize {
        self.index_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_of.is_empty()
    }
}

/// Shared state of one thaw call.
#[derive(Debug)]
pub struct ThawSession {
    addresses: Vec<Address>,
}

impl ThawSession {
    /// Address of the node behind `node_ref` in the tree being rebuilt.
    pub fn resolve(&self, node_ref: NodeRef) -> Result<&Address, SerializationError> {
        self.addresses
            .get(node_ref.0)
            .ok_or(SerializationError::DanglingReference(node_ref.0))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenStep {
    pub kind: String,
    pub state: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenShortcircuit {
    pub kind: String,
    pub state: serde_json::Value,
}

/// At-rest form of one node. `parent` and `children` are arena indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenNode {
    pub id: String,
    pub parent: Option<usize>,
    pub children: BTreeMap<String, usize>,
    pub step: FrozenStep,
    pub rules: RuleSet,
    #[serde(default)]
    pub shortcircuits: BTreeMap<MessageType, FrozenShortcircuit>,
    #[serde(default)]
    pub intercept: bool,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

/// At-rest form of a whole actor tree. Index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableActor {
    address: Address,
    nodes: Vec<FrozenNode>,
}

impl SerializableActor {
    /// Freeze a fresh single-node tree.
    pub fn spawn(address: Address, step: Box<dyn Step>) -> Result<Self, SerializationError> {
        Self::freeze(&ActorTree::new(address, step))
    }

    /// Freeze `tree` depth-first.
    pub fn freeze(tree: &ActorTree) -> Result<Self, SerializationError> {
        let order = tree.depth_first();
        let index_by_node: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut index_of = HashMap::with_capacity(order.len());
        for (index, id) in order.iter().enumerate() {
            if let Some(node) = tree.node(*id) {
                index_of.insert(node.address().clone(), index);
            }
        }
        let session = FreezeSession { index_of };

        let mut nodes = Vec::with_capacity(order.len());
        for id in &order {
            let node = tree
                .node(*id)
                .ok_or_else(|| SerializationError::Malformed(format!("{:?} vanished", id)))?;
            let context = node.context();

            let mut shortcircuits = BTreeMap::new();
            for (message_type, hook) in context.shortcircuits() {
                shortcircuits.insert(
                    message_type.clone(),
                    FrozenShortcircuit {
                        kind: hook.kind().to_string(),
                        state: hook.freeze()?,
                    },
                );
            }

            let children = node
                .children()
                .iter()
                .filter_map(|(child_id, child)| {
                    index_by_node.get(child).map(|index| (child_id.clone(), *index))
                })
                .collect();

            nodes.push(FrozenNode {
                id: node.id().to_string(),
                parent: node.parent().and_then(|p| index_by_node.get(&p).copied()),
                children,
                step: FrozenStep {
                    kind: node.step().kind().to_string(),
                    state: node.step().freeze(&session)?,
                },
                rules: context.rules().clone(),
                shortcircuits,
                intercept: context.intercepts(),
                checkpoint: context.checkpoint().clone(),
            });
        }

        Ok(Self {
            address: tree.address().clone(),
            nodes,
        })
    }

    /// Rebuild the live tree, thawing every step through `catalog`.
    pub fn thaw(&self, catalog: &StepCatalog) -> Result<ActorTree, SerializationError> {
        let addresses = self.validate()?;
        let session = ThawSession { addresses };

        let mut tree: Option<ActorTree> = None;
        let mut node_ids: Vec<NodeId> = Vec::with_capacity(self.nodes.len());

        for (index, frozen) in self.nodes.iter().enumerate() {
            let step = catalog.thaw_step(&frozen.step, &session)?;

            let mut shortcircuits = BTreeMap::new();
            for (message_type, hook) in &frozen.shortcircuits {
                shortcircuits.insert(message_type.clone(), catalog.thaw_shortcircuit(hook)?);
            }

            let context = NodeContext::restore(
                session.addresses[index].clone(),
                frozen.rules.clone(),
                shortcircuits,
                frozen.checkpoint.clone(),
                frozen.intercept,
            );

            match (frozen.parent, tree.as_mut()) {
                (None, None) => {
                    tree = Some(ActorTree::with_root(step, context));
                    node_ids.push(NodeId::ROOT);
                }
                (Some(parent), Some(live)) => {
                    let id = live.insert(node_ids[parent], &frozen.id, step, context)?;
                    node_ids.push(id);
                }
                _ => {
                    return Err(SerializationError::Malformed(format!(
                        "node {} is out of order",
                        index
                    )))
                }
            }
        }

        tree.ok_or_else(|| SerializationError::Malformed("tree has no nodes".to_string()))
    }

    /// Check the arena shape and compute every node's address.
    fn validate(&self) -> Result<Vec<Address>, SerializationError> {
        let malformed = |reason: String| Err(SerializationError::Malformed(reason));

        let Some(root) = self.nodes.first() else {
            return malformed("tree has no nodes".to_string());
        };
        if root.parent.is_some() {
            return malformed("root node has a parent".to_string());
        }

        let mut addresses = vec![self.address.clone()];
        for (index, node) in self.nodes.iter().enumerate().skip(1) {
            let Some(parent) = node.parent else {
                return malformed(format!("node {} has no parent", index));
            };
            if parent >= index {
                return malformed(format!("node {} precedes its parent {}", index, parent));
            }
            if self.nodes[parent].children.get(&node.id) != Some(&index) {
                return malformed(format!(
                    "node {} ({}) is not listed by its parent",
                    index, node.id
                ));
            }
            addresses.push(addresses[parent].child(&node.id)?);
        }

        for (index, node) in self.nodes.iter().enumerate() {
            for child in node.children.values() {
                if self.nodes.get(*child).and_then(|c| c.parent) != Some(index) {
                    return malformed(format!("child {} does not point back to {}", child, index));
                }
            }
        }

        Ok(addresses)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn nodes(&self) -> &[FrozenNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Checkpoint of the root. The only one a store looks at.
    pub fn checkpoint(&self) -> Checkpoint {
        self.nodes
            .first()
            .map(|root| root.checkpoint.clone())
            .unwrap_or_default()
    }

    pub fn checkpoint_instance(&self) -> u64 {
        self.nodes
            .first()
            .map(|root| root.checkpoint.instance())
            .unwrap_or_default()
    }

    pub fn set_checkpoint_instance(&mut self, instance: u64) {
        if let Some(root) = self.nodes.first_mut() {
            root.checkpoint.set_instance(instance);
        }
    }

    pub fn reset_checkpoint_updated(&mut self) {
        if let Some(root) = self.nodes.first_mut() {
            root.checkpoint.reset_updated();
        }
    }

    pub fn clear_checkpoint_timeout(&mut self) {
        if let Some(root) = self.nodes.first_mut() {
            root.checkpoint.clear_timeout();
        }
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }
}
