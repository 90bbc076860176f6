//! Runtime Integration Tests
//!
//! Worker pool and cross-address-space traffic:
//! - outgoing messages reach the shuttle registered for their prefix
//! - two runtimes exchanging messages through store shuttles
//! - channel shuttles toward a gateway

mod support;

use anyhow::Result;
use async_trait::async_trait;
use mockall::mock;
use runtime::{
    ActorRunnable, ActorRuntime, ChannelShuttle, MemoryStore, Message, Payload, RuntimeConfig,
    Shuttle, ShuttleError, ShuttleRegistry, Store, StoreShuttle,
};
use std::sync::Arc;
use std::time::Duration;
use support::*;

mock! {
    pub Remote {}

    #[async_trait]
    impl Shuttle for Remote {
        fn prefix(&self) -> &str;
        async fn send(&self, messages: Vec<Message>) -> Result<(), ShuttleError>;
    }
}

fn config(prefix: &str) -> RuntimeConfig {
    RuntimeConfig::new(prefix)
        .with_workers(2)
        .with_shutdown_timeout(Duration::from_secs(2))
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

/// Messages for a foreign prefix are handed to its shuttle in one batch
#[tokio::test]
async fn test_foreign_messages_use_registered_shuttle() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    create_open(
        &store,
        "local:a",
        Forwarder {
            target: Some(addr("remote:b:inbox")),
            handled: 0,
        },
    )
    .await?;
    store
        .store_messages(vec![message("local:a", "local:a", "go")])
        .await?;

    let mut remote = MockRemote::new();
    remote.expect_prefix().return_const("remote".to_string());
    remote
        .expect_send()
        .withf(|messages| {
            messages.len() == 1
                && messages[0].destination().to_string() == "remote:b:inbox"
                && messages[0].payload().is("x")
        })
        .times(1)
        .returning(|_| Ok(()));
    let shuttles = Arc::new(ShuttleRegistry::new());
    shuttles.register(Arc::new(remote));

    let worker = ActorRunnable::new("local", store.clone(), Arc::new(catalog()), shuttles);
    let report = worker.run_once().await?;

    assert_eq!(report.forwarded_messages, 1);
    assert_eq!(report.dropped_messages, 0);
    Ok(())
}

/// A failing shuttle drops its batch without failing the iteration
#[tokio::test]
async fn test_shuttle_failure_drops_batch() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    create_open(
        &store,
        "local:a",
        Forwarder {
            target: Some(addr("remote:b")),
            handled: 0,
        },
    )
    .await?;
    store
        .store_messages(vec![message("local:a", "local:a", "go")])
        .await?;

    let mut remote = MockRemote::new();
    remote.expect_prefix().return_const("remote".to_string());
    remote.expect_send().times(1).returning(|_| {
        Err(ShuttleError::Unavailable {
            prefix: "remote".to_string(),
            reason: "link down".to_string(),
        })
    });
    let shuttles = Arc::new(ShuttleRegistry::new());
    shuttles.register(Arc::new(remote));

    let worker = ActorRunnable::new("local", store.clone(), Arc::new(catalog()), shuttles);
    let report = worker.run_once().await?;

    assert_eq!(report.dropped_messages, 1);
    assert!(store.contains(&addr("local:a")));
    Ok(())
}

/// Two runtimes deliver to each other through store shuttles
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_runtimes_exchange_messages() -> Result<()> {
    init_tracing();
    let west_store = Arc::new(MemoryStore::new());
    let east_store = Arc::new(MemoryStore::new());

    let west = ActorRuntime::new(config("west"), west_store.clone(), catalog())?;
    let east = ActorRuntime::new(config("east"), east_store.clone(), catalog())?;
    west.register_shuttle(Arc::new(StoreShuttle::new("east", east_store.clone())))?;
    east.register_shuttle(Arc::new(StoreShuttle::new("west", west_store.clone())))?;

    create_open(&east_store, "east:sink", Recorder::default()).await?;
    west.spawn_root(
        "source",
        Forwarder {
            target: Some(addr("east:sink")),
            handled: 0,
        },
        vec![Payload::signal("go")],
    )
    .await?;

    west.start()?;
    east.start()?;

    wait_until(|| {
        step_state(&east_store, "east:sink", 0) == Some(serde_json::json!({"seen": ["x"]}))
    })
    .await?;

    west.shutdown().await?;
    east.shutdown().await?;
    assert_eq!(
        step_state(&west_store, "west:source", 0),
        Some(serde_json::json!({"target": "east:sink", "handled": 1}))
    );
    Ok(())
}

/// Gateway traffic leaves through a channel shuttle
#[tokio::test]
async fn test_channel_shuttle_reaches_gateway() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let runtime = ActorRuntime::new(config("local"), store.clone(), catalog())?;
    let (shuttle, mut gateway) = ChannelShuttle::channel("gateway", 16);
    runtime.register_shuttle(Arc::new(shuttle))?;

    runtime
        .spawn_root(
            "greeter",
            Forwarder {
                target: Some(addr("gateway:http:conn-1")),
                handled: 0,
            },
            vec![Payload::signal("go")],
        )
        .await?;
    runtime.start()?;

    let delivered = tokio::time::timeout(Duration::from_secs(2), gateway.recv())
        .await?
        .expect("gateway channel open");
    assert_eq!(delivered.source(), &addr("local:greeter"));
    assert_eq!(delivered.destination(), &addr("gateway:http:conn-1"));

    runtime.shutdown().await?;
    Ok(())
}

/// Shutdown with no work pending returns promptly
#[tokio::test]
async fn test_idle_runtime_shuts_down() -> Result<()> {
    let runtime = ActorRuntime::new(config("local"), Arc::new(MemoryStore::new()), catalog())?;
    runtime.start()?;
    assert!(runtime.is_running());
    runtime.shutdown().await?;
    assert!(!runtime.is_running());
    Ok(())
}

