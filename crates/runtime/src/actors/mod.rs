//! Actor Tree Core Components
//!
//! This module provides the building blocks for executing one actor tree:
//! - [`Step`]: the opaque, resumable behaviour of a node
//! - [`Context`]: what a step sees and produces during one delivery
//! - [`ActorTree`]: the live arena of nodes with its shared effects buffer
//! - [`route`]: the tree walk that delivers one message
//! - [`SerializableActor`]: the at-rest form exchanged with a store
//! - [`StepCatalog`]: the registry used to thaw frozen steps

pub mod catalog;
pub mod context;
pub mod routing;
pub mod serialization;
pub mod shortcircuit;
pub mod tree;

pub use catalog::StepCatalog;
pub use context::{Checkpoint, ChildSpawn, Context, Delivery, Effects, NodeContext, RootSpawn};
pub use routing::{route, CHECKPOINT_TIMEOUT_TYPE};
pub use serialization::{
    freeze_state, FreezeSession, FrozenNode, FrozenShortcircuit, FrozenStep, NodeRef,
    SerializableActor, SerializationError, ThawSession,
};
pub use shortcircuit::{
    FixedShortcircuit, Shortcircuit, ShortcircuitAction, SourcePrefixShortcircuit,
};
pub use tree::{ActorNode, ActorTree, NodeId};

use peerloom_core::{AddressError, MessageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of running a step once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// More work pending; the node stays alive and waits for the next message
    Suspended,
    /// The node is done and must be removed
    Finished,
}

/// Tree-routing request a node leaves behind after an intercepting invoke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspendMode {
    /// Keep the message; do not forward it further down
    #[default]
    Release,
    /// Forward to the addressed descendant and do not come back
    ForwardAndRelease,
    /// Forward to the addressed descendant, then invoke this node again
    ForwardAndReturn,
}

impl fmt::Display for SuspendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendMode::Release => write!(f, "release"),
            SuspendMode::ForwardAndRelease => write!(f, "forward_and_release"),
            SuspendMode::ForwardAndReturn => write!(f, "forward_and_return"),
        }
    }
}

/// The behaviour of one actor node.
///
/// The runtime never inspects a step; it only resumes it with a [`Context`]
/// and freezes it between deliveries. All suspension state lives inside the
/// implementation. A step is thawed again through the [`StepCatalog`] entry
/// registered under [`Step::kind`].
pub trait Step: Send + 'static {
    /// Catalog key used to thaw the frozen state.
    fn kind(&self) -> &str;

    /// Handle the message currently exposed by `ctx`.
    fn step(&mut self, ctx: &mut Context<'_>) -> Result<StepOutcome, StepError>;

    /// Capture the resumable state. `session` resolves references to other
    /// nodes of the same tree into [`NodeRef`]s.
    fn freeze(&self, session: &FreezeSession) -> Result<serde_json::Value, SerializationError>;
}

/// Fault raised by a step. Caught at the invoke boundary and treated as the
/// completion of the root.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("step failed: {0}")]
    Failed(String),

    #[error("step panicked: {0}")]
    Panicked(String),

    #[error("context operation rejected: {0}")]
    Context(#[from] ContextError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

impl From<anyhow::Error> for StepError {
    fn from(error: anyhow::Error) -> Self {
        StepError::Failed(format!("{:#}", error))
    }
}

/// Precondition violations on [`Context`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("source {source_address} is not inside {self_address}")]
    SourceOutsideSelf {
        source_address: String,
        self_address: String,
    },

    #[error("invalid actor id {0:?}")]
    InvalidId(String),

    #[error("address error: {0}")]
    Address(#[from] AddressError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

/// Structural errors on an [`ActorTree`].
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("node {0:?} does not exist")]
    NodeNotFound(NodeId),

    #[error("child {id} already exists under {parent}")]
    ChildExists { parent: String, id: String },

    #[error("the root node cannot be removed")]
    RootRemoval,

    #[error("address error: {0}")]
    Address(#[from] AddressError),
}
