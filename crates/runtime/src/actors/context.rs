//! Per-node state and the per-delivery Context
//!
//! Each node owns a [`NodeContext`]: its address, access rules, shortcircuit
//! table, checkpoint declaration and tree-routing flags. While a message is
//! delivered, the step receives a [`Context`] that borrows the node's state,
//! the tree's shared [`Effects`] buffer and the transient [`Delivery`].
//!
//! Effects are owned once per tree. A child that sends a message or spawns
//! an actor writes into the same buffer as the root, and the work loop
//! harvests that buffer exactly once per iteration.

use super::shortcircuit::Shortcircuit;
use super::{ContextError, Step, SuspendMode};
use chrono::{DateTime, Utc};
use peerloom_core::{Address, Message, MessageType, Payload, RuleSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Checkpoint declaration and fencing counter of a node.
///
/// Only the root's checkpoint is honoured by stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    payload: Option<Payload>,
    /// `None` means the checkpoint never fires
    timeout_ms: Option<u64>,
    instance: u64,
    updated: bool,
}

impl Checkpoint {
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    /// Fencing counter; bumped by the store on every eviction.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Whether the checkpoint was re-declared during the last step.
    pub fn updated(&self) -> bool {
        self.updated
    }

    pub fn set_instance(&mut self, instance: u64) {
        self.instance = instance;
    }

    /// Disarm the deadline so an eviction fires once per stall.
    pub fn clear_timeout(&mut self) {
        self.timeout_ms = None;
    }

    pub fn reset_updated(&mut self) {
        self.updated = false;
    }

    pub(crate) fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.timeout_ms = Some(timeout_ms);
    }

    pub(crate) fn declare(&mut self, payload: Payload, timeout: Duration) {
        self.payload = Some(payload);
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self.updated = true;
    }
}

/// The message being delivered. Exists only for the duration of one invoke.
#[derive(Debug, Clone)]
pub struct Delivery {
    source: Address,
    destination: Address,
    time: DateTime<Utc>,
    payload: Payload,
}

impl Delivery {
    pub fn new(source: Address, destination: Address, time: DateTime<Utc>, payload: Payload) -> Self {
        Self {
            source,
            destination,
            time,
            payload,
        }
    }

    pub fn from_message(message: &Message, time: DateTime<Utc>) -> Self {
        Self::new(
            message.source().clone(),
            message.destination().clone(),
            time,
            message.payload().clone(),
        )
    }

    pub fn source(&self) -> &Address {
        &self.source
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn message_type(&self) -> &MessageType {
        self.payload.message_type()
    }
}

/// Deferred request to create a new root actor at `<worker prefix>:<id>`.
pub struct RootSpawn {
    pub id: String,
    pub step: Box<dyn Step>,
    pub priming: Vec<Payload>,
}

impl fmt::Debug for RootSpawn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSpawn")
            .field("id", &self.id)
            .field("kind", &self.step.kind())
            .field("priming", &self.priming.len())
            .finish()
    }
}

/// Deferred request to create a child below `parent`.
pub struct ChildSpawn {
    pub parent: Address,
    pub id: String,
    pub step: Box<dyn Step>,
    pub priming: Vec<Payload>,
}

impl fmt::Debug for ChildSpawn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpawn")
            .field("parent", &self.parent.to_string())
            .field("id", &self.id)
            .field("kind", &self.step.kind())
            .field("priming", &self.priming.len())
            .finish()
    }
}

/// Side effects accumulated by every node of one tree.
#[derive(Debug, Default)]
pub struct Effects {
    outgoing: Vec<Message>,
    new_roots: Vec<RootSpawn>,
    new_children: Vec<ChildSpawn>,
}

impl Effects {
    pub fn outgoing(&self) -> &[Message] {
        &self.outgoing
    }

    pub fn new_roots(&self) -> &[RootSpawn] {
        &self.new_roots
    }

    pub fn new_children(&self) -> &[ChildSpawn] {
        &self.new_children
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.new_roots.is_empty() && self.new_children.is_empty()
    }

    pub fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn take_new_roots(&mut self) -> Vec<RootSpawn> {
        std::mem::take(&mut self.new_roots)
    }

    pub fn take_new_children(&mut self) -> Vec<ChildSpawn> {
        std::mem::take(&mut self.new_children)
    }

    pub(crate) fn push_outgoing(&mut self, message: Message) {
        self.outgoing.push(message);
    }
}

/// State private to one node.
pub struct NodeContext {
    self_address: Address,
    rules: RuleSet,
    shortcircuits: BTreeMap<MessageType, Box<dyn Shortcircuit>>,
    checkpoint: Checkpoint,
    intercept: bool,
    mode: SuspendMode,
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("self_address", &self.self_address.to_string())
            .field("rules", &self.rules)
            .field("shortcircuits", &self.shortcircuits.keys().collect::<Vec<_>>())
            .field("checkpoint", &self.checkpoint)
            .field("intercept", &self.intercept)
            .field("mode", &self.mode)
            .finish()
    }
}

impl NodeContext {
    /// Fresh state: rejects every source except the node itself.
    pub fn new(self_address: Address) -> Self {
        let rules = RuleSet::owner_only(&self_address);
        Self {
            self_address,
            rules,
            shortcircuits: BTreeMap::new(),
            checkpoint: Checkpoint::default(),
            intercept: false,
            mode: SuspendMode::Release,
        }
    }

    pub(crate) fn restore(
        self_address: Address,
        rules: RuleSet,
        shortcircuits: BTreeMap<MessageType, Box<dyn Shortcircuit>>,
        checkpoint: Checkpoint,
        intercept: bool,
    ) -> Self {
        Self {
            self_address,
            rules,
            shortcircuits,
            checkpoint,
            intercept,
            mode: SuspendMode::Release,
        }
    }

    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleSet {
        &mut self.rules
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn checkpoint_mut(&mut self) -> &mut Checkpoint {
        &mut self.checkpoint
    }

    pub fn intercepts(&self) -> bool {
        self.intercept
    }

    pub fn set_intercept(&mut self, intercept: bool) {
        self.intercept = intercept;
    }

    pub fn mode(&self) -> SuspendMode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: SuspendMode) {
        self.mode = mode;
    }

    pub fn shortcircuit(&self, message_type: &MessageType) -> Option<&dyn Shortcircuit> {
        self.shortcircuits.get(message_type).map(|hook| hook.as_ref())
    }

    pub fn shortcircuits(&self) -> impl Iterator<Item = (&MessageType, &dyn Shortcircuit)> {
        self.shortcircuits
            .iter()
            .map(|(tag, hook)| (tag, hook.as_ref()))
    }

    pub fn set_shortcircuit(&mut self, message_type: MessageType, hook: Box<dyn Shortcircuit>) {
        self.shortcircuits.insert(message_type, hook);
    }

    pub fn remove_shortcircuit(&mut self, message_type: &MessageType) -> bool {
        self.shortcircuits.remove(message_type).is_some()
    }
}

/// What a step sees and produces while handling one message.
pub struct Context<'a> {
    node: &'a mut NodeContext,
    effects: &'a mut Effects,
    delivery: &'a Delivery,
    is_root: bool,
}

impl<'a> Context<'a> {
    pub fn new(
        node: &'a mut NodeContext,
        effects: &'a mut Effects,
        delivery: &'a Delivery,
        is_root: bool,
    ) -> Self {
        Self {
            node,
            effects,
            delivery,
            is_root,
        }
    }

    pub fn self_address(&self) -> &Address {
        self.node.self_address()
    }

    pub fn source(&self) -> &Address {
        self.delivery.source()
    }

    pub fn destination(&self) -> &Address {
        self.delivery.destination()
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.delivery.time()
    }

    pub fn in_message(&self) -> &Payload {
        self.delivery.payload()
    }

    /// Decode the incoming payload body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ContextError> {
        Ok(self.delivery.payload().decode()?)
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Queue `payload` from `source` to `destination`. `source` must lie
    /// inside this node's address.
    pub fn out(
        &mut self,
        source: Address,
        destination: Address,
        payload: Payload,
    ) -> Result<(), ContextError> {
        if !self.node.self_address.is_prefix_of(&source) {
            return Err(ContextError::SourceOutsideSelf {
                source_address: source.to_string(),
                self_address: self.node.self_address.to_string(),
            });
        }
        let message = Message::new(source, destination, payload)?;
        trace!(
            from = %message.source(),
            to = %message.destination(),
            message_type = %message.payload().message_type(),
            "Outgoing message queued"
        );
        self.effects.push_outgoing(message);
        Ok(())
    }

    /// Queue `payload` from this node to `destination`.
    pub fn out_to(&mut self, destination: Address, payload: Payload) -> Result<(), ContextError> {
        let source = self.node.self_address.clone();
        self.out(source, destination, payload)
    }

    /// Answer the sender of the current message.
    pub fn reply(&mut self, payload: Payload) -> Result<(), ContextError> {
        let destination = self.delivery.source().clone();
        self.out_to(destination, payload)
    }

    /// Answer the sender of the current message from a sub-address.
    pub fn reply_from(&mut self, source: Address, payload: Payload) -> Result<(), ContextError> {
        let destination = self.delivery.source().clone();
        self.out(source, destination, payload)
    }

    /// Request a new independent root actor. Created after the step returns.
    pub fn root(
        &mut self,
        id: impl Into<String>,
        step: impl Step,
        priming: Vec<Payload>,
    ) -> Result<(), ContextError> {
        let id = validate_id(id.into())?;
        self.effects.new_roots.push(RootSpawn {
            id,
            step: Box::new(step),
            priming,
        });
        Ok(())
    }

    /// Like [`Context::root`] with a generated id, which is returned.
    pub fn root_unique(&mut self, step: impl Step, priming: Vec<Payload>) -> Result<String, ContextError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.root(id.clone(), step, priming)?;
        Ok(id)
    }

    /// Request a child below this node. Created after the step returns.
    pub fn child(
        &mut self,
        id: impl Into<String>,
        step: impl Step,
        priming: Vec<Payload>,
    ) -> Result<(), ContextError> {
        let id = validate_id(id.into())?;
        self.effects.new_children.push(ChildSpawn {
            parent: self.node.self_address.clone(),
            id,
            step: Box::new(step),
            priming,
        });
        Ok(())
    }

    /// Declare the state to roll back to if this actor stalls for longer
    /// than `timeout`. `payload` is delivered to the restored actor.
    pub fn checkpoint(&mut self, payload: Payload, timeout: Duration) {
        self.node.checkpoint.declare(payload, timeout);
    }

    pub fn checkpoint_state(&self) -> &Checkpoint {
        &self.node.checkpoint
    }

    pub fn rules(&self) -> &RuleSet {
        &self.node.rules
    }

    pub fn allow(&mut self, address: Address, include_children: bool) {
        self.node.rules.allow(address, include_children);
    }

    pub fn allow_types<I, T>(&mut self, address: Address, include_children: bool, types: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageType>,
    {
        self.node.rules.allow_types(address, include_children, types);
    }

    pub fn block(&mut self, address: Address, include_children: bool) {
        self.node.rules.reject(address, include_children);
    }

    pub fn block_types<I, T>(&mut self, address: Address, include_children: bool, types: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageType>,
    {
        self.node.rules.reject_types(address, include_children, types);
    }

    pub fn allow_all(&mut self) {
        self.node.rules.allow_all();
    }

    pub fn block_all(&mut self) {
        self.node.rules.reject_all();
    }

    /// Set the routing request consumed after this invoke.
    pub fn mode(&mut self, mode: SuspendMode) {
        self.node.mode = mode;
    }

    pub fn suspend_mode(&self) -> SuspendMode {
        self.node.mode
    }

    /// Opt in (or out) of seeing messages addressed to descendants first.
    pub fn intercept(&mut self, intercept: bool) {
        self.node.intercept = intercept;
    }

    pub fn shortcircuit(&mut self, message_type: impl Into<MessageType>, hook: impl Shortcircuit) {
        self.node
            .set_shortcircuit(message_type.into(), Box::new(hook));
    }

    pub fn remove_shortcircuit(&mut self, message_type: impl Into<MessageType>) -> bool {
        self.node.remove_shortcircuit(&message_type.into())
    }
}

fn validate_id(id: String) -> Result<String, ContextError> {
    if id.is_empty() {
        return Err(ContextError::InvalidId(id));
    }
    Ok(id)
}
