//! Actor persistence boundary
//!
//! A [`Store`] owns every actor of one address space between deliveries:
//! their frozen trees, their pending messages, their checkpoint snapshots
//! and the lease that keeps two workers from running the same actor.
//!
//! The checkpoint instance is the fencing counter. A store bumps it whenever
//! it evicts an actor back to its checkpoint, and refuses any later write
//! that still carries the old value.

pub mod memory;

pub use memory::MemoryStore;

use crate::actors::SerializableActor;
use async_trait::async_trait;
use peerloom_core::{Address, Message};
use thiserror::Error;

/// Unrecoverable store failures. Stale writes are not errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored actor {address} is corrupted: {reason}")]
    Corrupted { address: String, reason: String },

    #[error("invalid work item: actor {actor} does not own {destination}")]
    InvalidWork { actor: String, destination: String },
}

/// One unit of work handed to a worker: a message and its owning actor.
#[derive(Debug, Clone)]
pub struct StoredWork {
    message: Message,
    actor: SerializableActor,
}

impl StoredWork {
    pub fn new(message: Message, actor: SerializableActor) -> Result<Self, StoreError> {
        if !actor.address().is_prefix_of(message.destination()) {
            return Err(StoreError::InvalidWork {
                actor: actor.address().to_string(),
                destination: message.destination().to_string(),
            });
        }
        Ok(Self { message, actor })
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn actor(&self) -> &SerializableActor {
        &self.actor
    }

    pub fn into_parts(self) -> (Message, SerializableActor) {
        (self.message, self.actor)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Wait for the next unit of work. The returned actor is leased to the
    /// caller until it is stored or discarded.
    async fn take(&self) -> Result<StoredWork, StoreError>;

    /// Write back a leased actor. `false` if the address is unknown or the
    /// actor carries a stale checkpoint instance; nothing is applied then.
    async fn store(&self, actor: SerializableActor) -> Result<bool, StoreError>;

    /// Register a new root actor. `false` if the address is already taken.
    async fn create(&self, actor: SerializableActor) -> Result<bool, StoreError>;

    /// Queue messages for the actors owning their destinations.
    async fn store_messages(&self, messages: Vec<Message>) -> Result<(), StoreError>;

    /// Remove an actor and its queue. `true` if nothing is left at
    /// `address`, `false` if `instance` is stale and nothing was removed.
    async fn discard(&self, address: &Address, instance: u64) -> Result<bool, StoreError>;
}
