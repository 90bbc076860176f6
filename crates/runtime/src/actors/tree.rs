//! Live actor trees
//!
//! An [`ActorTree`] is an arena of [`ActorNode`]s. Parent links are plain
//! indices (back-references only); ownership flows through each node's
//! children map. The tree also owns the [`Effects`] buffer every node of the
//! tree writes into.

use super::context::{Effects, NodeContext};
use super::{Step, TreeError};
use peerloom_core::Address;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Index of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

/// One actor of a tree.
pub struct ActorNode {
    id: String,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    pub(crate) step: Box<dyn Step>,
    pub(crate) context: NodeContext,
}

impl ActorNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn children(&self) -> &BTreeMap<String, NodeId> {
        &self.children
    }

    pub fn step(&self) -> &dyn Step {
        self.step.as_ref()
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut NodeContext {
        &mut self.context
    }

    pub fn address(&self) -> &Address {
        self.context.self_address()
    }
}

impl fmt::Debug for ActorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("kind", &self.step.kind())
            .field("context", &self.context)
            .finish()
    }
}

/// A root actor and all of its descendants.
#[derive(Debug)]
pub struct ActorTree {
    nodes: Vec<Option<ActorNode>>,
    effects: Effects,
}

impl ActorTree {
    /// A tree holding only a fresh root at `address`.
    pub fn new(address: Address, step: Box<dyn Step>) -> Self {
        let context = NodeContext::new(address);
        Self::with_root(step, context)
    }

    pub(crate) fn with_root(step: Box<dyn Step>, context: NodeContext) -> Self {
        let id = context.self_address().last().unwrap_or_default().to_string();
        let root = ActorNode {
            id,
            parent: None,
            children: BTreeMap::new(),
            step,
            context,
        };
        Self {
            nodes: vec![Some(root)],
            effects: Effects::default(),
        }
    }

    pub fn root_id(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Address of the root.
    pub fn address(&self) -> &Address {
        self.root().address()
    }

    pub fn root(&self) -> &ActorNode {
        match self.nodes.first() {
            Some(Some(root)) => root,
            _ => unreachable!("the root slot is never vacated"),
        }
    }

    pub fn root_mut(&mut self) -> &mut ActorNode {
        match self.nodes.first_mut() {
            Some(Some(root)) => root,
            _ => unreachable!("the root slot is never vacated"),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&ActorNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ActorNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Borrow one node together with the tree's effects buffer.
    pub(crate) fn split_node(&mut self, id: NodeId) -> Option<(&mut ActorNode, &mut Effects)> {
        let node = self.nodes.get_mut(id.0).and_then(Option::as_mut)?;
        Some((node, &mut self.effects))
    }

    pub fn effects(&self) -> &Effects {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut Effects {
        &mut self.effects
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn child_of(&self, parent: NodeId, id: &str) -> Option<NodeId> {
        self.node(parent)?.children.get(id).copied()
    }

    /// Locate the node living exactly at `address`.
    pub fn find(&self, address: &Address) -> Option<NodeId> {
        let mut current = self.root_id();
        loop {
            let node = self.node(current)?;
            if node.address() == address {
                return Some(current);
            }
            let next = address.next_after(node.address())?;
            current = self.child_of(current, next)?;
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.find(address).is_some()
    }

    /// Attach a fresh child `id` below `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        id: &str,
        step: Box<dyn Step>,
    ) -> Result<NodeId, TreeError> {
        let parent_address = self
            .node(parent)
            .ok_or(TreeError::NodeNotFound(parent))?
            .address()
            .child(id)?;
        self.insert(parent, id, step, NodeContext::new(parent_address))
    }

    pub(crate) fn insert(
        &mut self,
        parent: NodeId,
        id: &str,
        step: Box<dyn Step>,
        context: NodeContext,
    ) -> Result<NodeId, TreeError> {
        let parent_node = self.node(parent).ok_or(TreeError::NodeNotFound(parent))?;
        if parent_node.children.contains_key(id) {
            return Err(TreeError::ChildExists {
                parent: parent_node.address().to_string(),
                id: id.to_string(),
            });
        }

        let node_id = NodeId(self.nodes.len());
        self.nodes.push(Some(ActorNode {
            id: id.to_string(),
            parent: Some(parent),
            children: BTreeMap::new(),
            step,
            context,
        }));
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.insert(id.to_string(), node_id);
        }
        Ok(node_id)
    }

    /// Detach a non-root node and drop it together with its descendants.
    pub fn remove(&mut self, id: NodeId) -> Result<(), TreeError> {
        let node = self.node(id).ok_or(TreeError::NodeNotFound(id))?;
        let Some(parent) = node.parent else {
            return Err(TreeError::RootRemoval);
        };
        let child_id = node.id.clone();
        debug!(actor = %node.address(), "Removing finished child");

        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.remove(&child_id);
        }

        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(removed) = self.nodes.get_mut(current.0).and_then(Option::take) {
                pending.extend(removed.children.values().copied());
            }
        }
        Ok(())
    }

    /// Live nodes in depth-first pre-order, children visited by id.
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root_id()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node(current) else {
                continue;
            };
            order.push(current);
            stack.extend(node.children.values().rev().copied());
        }
        order
    }
}
