//! Store Contract Tests
//!
//! Leasing and fencing guarantees of the in-memory store under concurrent
//! workers.

mod support;

use anyhow::Result;
use runtime::{MemoryStore, SerializableActor, Store};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use support::*;

/// Concurrent takers never receive the same actor twice
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_take_is_exclusive() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    for i in 0..16 {
        let address = format!("local:a{}", i);
        create_open(&store, &address, Recorder::default()).await?;
        store
            .store_messages(vec![
                message("remote:x", &address, "first"),
                message("remote:x", &address, "second"),
            ])
            .await?;
    }

    let mut takers = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        takers.push(tokio::spawn(async move { store.take().await }));
    }

    let mut leased = HashSet::new();
    for taker in takers {
        let work = tokio::time::timeout(Duration::from_secs(2), taker).await???;
        assert!(
            leased.insert(work.actor().address().clone()),
            "{} handed out twice",
            work.actor().address()
        );
    }
    assert_eq!(leased.len(), 16);

    // every actor is leased, so nothing else is handed out
    let extra = tokio::time::timeout(Duration::from_millis(50), store.take()).await;
    assert!(extra.is_err());
    Ok(())
}

/// Releasing a lease makes the next queued message available
#[tokio::test]
async fn test_store_releases_lease_in_order() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    create_open(&store, "local:a", Recorder::default()).await?;
    store
        .store_messages(vec![
            message("remote:x", "local:a", "one"),
            message("remote:x", "local:a", "two"),
            message("remote:x", "local:a", "three"),
        ])
        .await?;

    let mut order = Vec::new();
    for _ in 0..3 {
        let work = store.take().await?;
        order.push(work.message().payload().message_type().to_string());
        assert!(store.store(work.actor().clone()).await?);
    }
    assert_eq!(order, vec!["one", "two", "three"]);
    Ok(())
}

/// Writes and discards carrying an old instance are refused without effect
#[tokio::test]
async fn test_fencing_rejects_stale_instance() -> Result<()> {
    let store = MemoryStore::new();
    let mut actor = store_actor("local:a")?;
    actor.set_checkpoint_instance(3);
    store.create(actor.clone()).await?;

    let mut stale = actor.clone();
    stale.set_checkpoint_instance(2);
    assert!(!store.store(stale).await?);
    assert!(!store.discard(&addr("local:a"), 2).await?);
    assert_eq!(store.instance(&addr("local:a")), Some(3));

    assert!(store.discard(&addr("local:a"), 3).await?);
    assert!(store.discard(&addr("local:a"), 3).await?, "absent is a no-op");
    Ok(())
}

/// An eviction is delivered even while the actor is idle
#[tokio::test(start_paused = true)]
async fn test_idle_actor_is_restored_at_deadline() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    create_open(&store, "local:k", Checkpointer::default()).await?;
    store
        .store_messages(vec![message("remote:x", "local:k", "work")])
        .await?;

    let work = store.take().await?;
    let mut tree = work.actor().thaw(&catalog())?;
    runtime::route(&mut tree, work.message(), chrono::Utc::now());
    assert!(store.store(SerializableActor::freeze(&tree)?).await?);

    // nothing queued: take sleeps until the checkpoint deadline
    let restored = store.take().await?;
    assert!(restored.message().payload().is("resume"));
    assert_eq!(restored.actor().checkpoint_instance(), 1);
    Ok(())
}

fn store_actor(address: &str) -> Result<SerializableActor> {
    Ok(SerializableActor::spawn(
        addr(address),
        Box::new(Recorder::default()),
    )?)
}
