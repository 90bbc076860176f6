//! Hierarchical actor runtime for peerloom
//!
//! Actors live in trees. A root actor owns an address such as `local:orders`
//! and may grow children below it (`local:orders:item-7`). Between messages a
//! whole tree is frozen into a [`SerializableActor`] and kept by a [`Store`];
//! a pool of work loops takes one message at a time, thaws the owning tree,
//! routes the message through it and writes everything back.
//!
//! # Architecture
//!
//! - **Step**: the resumable behaviour of one node, frozen between messages
//! - **Context**: what a step sees and emits during one delivery
//! - **ActorTree**: the live tree with its shared effects buffer
//! - **Store**: leases, queues and checkpoint fencing per actor
//! - **Shuttle**: outbound transport toward other address spaces
//! - **ActorRunnable**: one work loop
//! - **ActorRuntime**: a pool of work loops over one store
//!
//! # Usage
//!
//! ```no_run
//! use runtime::{ActorRuntime, MemoryStore, RuntimeConfig, StepCatalog};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let catalog = StepCatalog::new();
//!     let runtime = ActorRuntime::new(
//!         RuntimeConfig::from_env(),
//!         Arc::new(MemoryStore::new()),
//!         catalog,
//!     )?;
//!
//!     runtime.start()?;
//!     // seed actors with runtime.spawn_root(..)
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod actors;
pub mod config;
pub mod runnable;
pub mod shuttle;
pub mod store;
pub mod system;

pub use actors::{
    route, ActorNode, ActorTree, Checkpoint, Context, ContextError, Delivery, FixedShortcircuit,
    FreezeSession, NodeId, NodeRef, SerializableActor, SerializationError, Shortcircuit,
    ShortcircuitAction, SourcePrefixShortcircuit, Step, StepCatalog, StepError, StepOutcome,
    SuspendMode, ThawSession, TreeError, CHECKPOINT_TIMEOUT_TYPE,
};
pub use config::{ConfigError, RuntimeConfig};
pub use runnable::{ActorRunnable, IterationReport};
pub use shuttle::{ChannelShuttle, Shuttle, ShuttleError, ShuttleRegistry, StoreShuttle};
pub use store::{MemoryStore, Store, StoreError, StoredWork};
pub use system::ActorRuntime;

pub use peerloom_core::{Address, Message, MessageType, Payload, RuleSet};

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the work loop and the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("shuttle error: {0}")]
    Shuttle(#[from] ShuttleError),

    #[error("address error: {0}")]
    Address(#[from] peerloom_core::AddressError),

    #[error("message error: {0}")]
    Message(#[from] peerloom_core::MessageError),

    #[error("prefix {0} is served by this runtime and cannot have a shuttle")]
    OwnPrefix(String),

    #[error("runtime already started")]
    AlreadyStarted,

    #[error("runtime has been shut down")]
    ShutDown,

    #[error("workers did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_convert() {
        let err: RuntimeError = StoreError::Unavailable("disk".to_string()).into();
        assert!(err.to_string().contains("disk"));

        let err: RuntimeError = ConfigError::NoWorkers.into();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn test_default_config_is_usable() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.prefix, "local");
    }
}
