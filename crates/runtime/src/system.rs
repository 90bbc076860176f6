//! Worker pool for one address space
//!
//! An [`ActorRuntime`] owns the shared pieces every worker needs (store,
//! step catalog, shuttle registry) and runs `worker_count` work loops on the
//! tokio runtime until it is shut down.

use crate::actors::{SerializableActor, Step, StepCatalog};
use crate::config::RuntimeConfig;
use crate::runnable::ActorRunnable;
use crate::shuttle::{Shuttle, ShuttleRegistry};
use crate::store::Store;
use crate::RuntimeError;
use parking_lot::Mutex;
use peerloom_core::{Address, Message, Payload};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ActorRuntime {
    config: RuntimeConfig,
    store: Arc<dyn Store>,
    catalog: Arc<StepCatalog>,
    shuttles: Arc<ShuttleRegistry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl ActorRuntime {
    /// Create a runtime. Workers are not started until [`ActorRuntime::start`].
    pub fn new(
        config: RuntimeConfig,
        store: Arc<dyn Store>,
        catalog: StepCatalog,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        info!(
            prefix = %config.prefix,
            workers = config.worker_count,
            "Initializing actor runtime"
        );

        Ok(Self {
            config,
            store,
            catalog: Arc::new(catalog),
            shuttles: Arc::new(ShuttleRegistry::new()),
            workers: Mutex::new(Vec::new()),
            shutdown_token: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn shuttles(&self) -> &Arc<ShuttleRegistry> {
        &self.shuttles
    }

    /// Route messages for `shuttle.prefix()` through `shuttle`.
    pub fn register_shuttle(&self, shuttle: Arc<dyn Shuttle>) -> Result<(), RuntimeError> {
        if shuttle.prefix() == self.config.prefix {
            return Err(RuntimeError::OwnPrefix(self.config.prefix.clone()));
        }
        if let Some(previous) = self.shuttles.register(shuttle) {
            warn!(prefix = %previous.prefix(), "Replaced existing shuttle");
        }
        Ok(())
    }

    /// Seed a root actor at `<prefix>:<id>` from outside any tree. Returns
    /// its address, or `None` if the address is already taken.
    pub async fn spawn_root(
        &self,
        id: &str,
        step: impl Step,
        priming: Vec<Payload>,
    ) -> Result<Option<Address>, RuntimeError> {
        let address = Address::new([self.config.prefix.as_str(), id])?;
        let actor = SerializableActor::spawn(address.clone(), Box::new(step))?;

        if !self.store.create(actor).await? {
            warn!(actor = %address, "Address already in use; root not spawned");
            return Ok(None);
        }

        let priming = priming
            .into_iter()
            .map(|payload| Message::new(address.clone(), address.clone(), payload))
            .collect::<Result<Vec<_>, _>>()?;
        if !priming.is_empty() {
            self.store.store_messages(priming).await?;
        }
        debug!(actor = %address, "Root actor seeded");
        Ok(Some(address))
    }

    /// A standalone work loop sharing this runtime's store, catalog and
    /// shuttles. Useful to drive iterations by hand.
    pub fn runnable(&self) -> ActorRunnable {
        ActorRunnable::new(
            self.config.prefix.clone(),
            self.store.clone(),
            self.catalog.clone(),
            self.shuttles.clone(),
        )
        .with_idle_backoff(self.config.idle_backoff)
    }

    /// Spawn the worker tasks.
    pub fn start(&self) -> Result<(), RuntimeError> {
        if self.shutdown_token.is_cancelled() {
            return Err(RuntimeError::ShutDown);
        }
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Err(RuntimeError::AlreadyStarted);
        }

        for index in 0..self.config.worker_count {
            let runnable = self.runnable();
            let token = self.shutdown_token.child_token();
            workers.push(tokio::spawn(async move {
                debug!(worker = index, "Worker started");
                runnable.run(token).await;
                debug!(worker = index, "Worker exited");
            }));
        }

        info!(
            prefix = %self.config.prefix,
            workers = workers.len(),
            "Actor runtime started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown_token.is_cancelled() && !self.workers.lock().is_empty()
    }

    /// Stop all workers. Waits for in-flight iterations up to
    /// `shutdown_timeout`, then aborts whatever is left.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        info!(prefix = %self.config.prefix, "Shutting down actor runtime");
        self.shutdown_token.cancel();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = workers.iter().map(|handle| handle.abort_handle()).collect();

        let joined = tokio::time::timeout(
            self.config.shutdown_timeout,
            join_workers(workers),
        )
        .await;

        match joined {
            Ok(()) => {
                info!(prefix = %self.config.prefix, "Actor runtime shutdown complete");
                Ok(())
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                warn!(
                    prefix = %self.config.prefix,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Workers did not stop in time; aborted"
                );
                Err(RuntimeError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }
}

async fn join_workers(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if let Err(e) = worker.await {
            if e.is_panic() {
                warn!(error = %e, "Worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{Context, FreezeSession, SerializationError, StepError, StepOutcome};
    use crate::shuttle::MockShuttle;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct Once;

    impl Step for Once {
        fn kind(&self) -> &str {
            "once"
        }

        fn step(&mut self, _ctx: &mut Context<'_>) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome::Finished)
        }

        fn freeze(&self, _session: &FreezeSession) -> Result<serde_json::Value, SerializationError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn runtime(store: Arc<MemoryStore>) -> ActorRuntime {
        let mut catalog = StepCatalog::new();
        catalog.register_with("once", |_, _| Ok(Box::new(Once) as Box<dyn Step>));
        let config = RuntimeConfig::new("local")
            .with_workers(2)
            .with_shutdown_timeout(Duration::from_secs(1));
        ActorRuntime::new(config, store, catalog).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = ActorRuntime::new(
            RuntimeConfig::new("").with_workers(1),
            Arc::new(MemoryStore::new()),
            StepCatalog::new(),
        );
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[tokio::test]
    async fn test_spawn_root_rejects_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let runtime = runtime(store.clone());

        let address = runtime
            .spawn_root("job", Once, vec![Payload::signal("go")])
            .await
            .unwrap();
        assert_eq!(address, Some("local:job".parse().unwrap()));
        assert_eq!(store.queued(&"local:job".parse().unwrap()), 1);
        assert_eq!(runtime.spawn_root("job", Once, vec![]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_workers_drain_and_stop() {
        let store = Arc::new(MemoryStore::new());
        let runtime = runtime(store.clone());
        runtime
            .spawn_root("job", Once, vec![Payload::signal("go")])
            .await
            .unwrap();

        runtime.start().unwrap();
        assert!(matches!(runtime.start(), Err(RuntimeError::AlreadyStarted)));

        let job: Address = "local:job".parse().unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while store.contains(&job) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        runtime.shutdown().await.unwrap();
        assert!(!runtime.is_running());
        assert!(matches!(runtime.start(), Err(RuntimeError::ShutDown)));
    }

    #[test]
    fn test_own_prefix_shuttle_rejected() {
        let runtime = runtime(Arc::new(MemoryStore::new()));
        let mut shuttle = MockShuttle::new();
        shuttle.expect_prefix().return_const("local".to_string());
        assert!(matches!(
            runtime.register_shuttle(Arc::new(shuttle)),
            Err(RuntimeError::OwnPrefix(_))
        ));
    }
}
