//! Transport toward other address spaces
//!
//! A [`Shuttle`] carries messages whose destination's first segment names a
//! foreign prefix. Workers look them up in the [`ShuttleRegistry`].

use crate::store::Store;
use async_trait::async_trait;
use dashmap::DashMap;
use peerloom_core::Message;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ShuttleError {
    #[error("shuttle for {prefix} is closed")]
    Closed { prefix: String },

    #[error("shuttle for {prefix} is unavailable: {reason}")]
    Unavailable { prefix: String, reason: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Shuttle: Send + Sync {
    /// First address segment this shuttle delivers to.
    fn prefix(&self) -> &str;

    async fn send(&self, messages: Vec<Message>) -> Result<(), ShuttleError>;
}

/// Keep only messages that belong to `prefix`.
fn retain_own(prefix: &str, messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|message| {
            let own = message.destination_prefix() == prefix;
            if !own {
                warn!(
                    prefix,
                    destination = %message.destination(),
                    "Dropping message handed to the wrong shuttle"
                );
            }
            own
        })
        .collect()
}

/// Hands messages straight to another address space's store.
pub struct StoreShuttle {
    prefix: String,
    store: Arc<dyn Store>,
}

impl StoreShuttle {
    pub fn new(prefix: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            prefix: prefix.into(),
            store,
        }
    }
}

#[async_trait]
impl Shuttle for StoreShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn send(&self, messages: Vec<Message>) -> Result<(), ShuttleError> {
        let messages = retain_own(&self.prefix, messages);
        if messages.is_empty() {
            return Ok(());
        }
        debug!(prefix = %self.prefix, count = messages.len(), "Shuttling messages to store");
        self.store
            .store_messages(messages)
            .await
            .map_err(|e| ShuttleError::Unavailable {
                prefix: self.prefix.clone(),
                reason: e.to_string(),
            })
    }
}

/// Pushes messages onto a channel, typically read by a gateway task.
pub struct ChannelShuttle {
    prefix: String,
    sender: mpsc::Sender<Message>,
}

impl ChannelShuttle {
    pub fn new(prefix: impl Into<String>, sender: mpsc::Sender<Message>) -> Self {
        Self {
            prefix: prefix.into(),
            sender,
        }
    }

    /// A shuttle together with the receiving end of its channel.
    pub fn channel(prefix: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(prefix, sender), receiver)
    }
}

#[async_trait]
impl Shuttle for ChannelShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn send(&self, messages: Vec<Message>) -> Result<(), ShuttleError> {
        for message in retain_own(&self.prefix, messages) {
            self.sender
                .send(message)
                .await
                .map_err(|_| ShuttleError::Closed {
                    prefix: self.prefix.clone(),
                })?;
        }
        Ok(())
    }
}

/// Shuttles by prefix, shared by all workers.
#[derive(Default)]
pub struct ShuttleRegistry {
    shuttles: DashMap<String, Arc<dyn Shuttle>>,
}

impl ShuttleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `shuttle` under its prefix, returning the one it replaces.
    pub fn register(&self, shuttle: Arc<dyn Shuttle>) -> Option<Arc<dyn Shuttle>> {
        let prefix = shuttle.prefix().to_string();
        debug!(prefix = %prefix, "Registering shuttle");
        self.shuttles.insert(prefix, shuttle)
    }

    pub fn get(&self, prefix: &str) -> Option<Arc<dyn Shuttle>> {
        self.shuttles.get(prefix).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, prefix: &str) -> Option<Arc<dyn Shuttle>> {
        self.shuttles.remove(prefix).map(|(_, shuttle)| shuttle)
    }

    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.shuttles.iter().map(|e| e.key().clone()).collect();
        prefixes.sort();
        prefixes
    }

    pub fn len(&self) -> usize {
        self.shuttles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shuttles.is_empty()
    }
}

impl std::fmt::Debug for ShuttleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuttleRegistry")
            .field("prefixes", &self.prefixes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::actors::{ActorTree, SerializableActor, Context, FreezeSession, SerializationError, Step, StepError, StepOutcome};
    use peerloom_core::{Address, Payload};

    fn msg(destination: &str) -> Message {
        Message::new(
            "local:a".parse().unwrap(),
            destination.parse().unwrap(),
            Payload::signal("hello"),
        )
        .unwrap()
    }

    struct Idle;

    impl Step for Idle {
        fn kind(&self) -> &str {
            "idle"
        }

        fn step(&mut self, _ctx: &mut Context<'_>) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome::Suspended)
        }

        fn freeze(&self, _session: &FreezeSession) -> Result<serde_json::Value, SerializationError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn test_channel_shuttle_filters_foreign_prefix() {
        let (shuttle, mut receiver) = ChannelShuttle::channel("gateway", 8);
        shuttle
            .send(vec![msg("gateway:http"), msg("other:x"), msg("gateway:ws")])
            .await
            .unwrap();
        drop(shuttle);

        let mut delivered = Vec::new();
        while let Some(message) = receiver.recv().await {
            delivered.push(message.destination().to_string());
        }
        assert_eq!(delivered, vec!["gateway:http", "gateway:ws"]);
    }

    #[tokio::test]
    async fn test_channel_shuttle_reports_closed() {
        let (shuttle, receiver) = ChannelShuttle::channel("gateway", 1);
        drop(receiver);
        let err = shuttle.send(vec![msg("gateway:http")]).await.unwrap_err();
        assert!(matches!(err, ShuttleError::Closed { .. }));
    }

    #[tokio::test]
    async fn test_store_shuttle_enqueues_remotely() {
        let remote = Arc::new(MemoryStore::new());
        let address: Address = "remote:b".parse().unwrap();
        let tree = ActorTree::new(address.clone(), Box::new(Idle));
        remote
            .create(SerializableActor::freeze(&tree).unwrap())
            .await
            .unwrap();

        let shuttle = StoreShuttle::new("remote", remote.clone());
        shuttle.send(vec![msg("remote:b"), msg("local:c")]).await.unwrap();
        assert_eq!(remote.queued(&address), 1);
    }

    #[test]
    fn test_registry_replaces_by_prefix() {
        let registry = ShuttleRegistry::new();
        let mut first = MockShuttle::new();
        first.expect_prefix().return_const("remote".to_string());
        let mut second = MockShuttle::new();
        second.expect_prefix().return_const("remote".to_string());

        assert!(registry.register(Arc::new(first)).is_none());
        assert!(registry.register(Arc::new(second)).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("remote").is_some());
        assert!(registry.get("local").is_none());
        assert!(registry.remove("remote").is_some());
        assert!(registry.is_empty());
    }
}
