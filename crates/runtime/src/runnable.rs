//! The work loop
//!
//! One iteration takes a unit of work from the store, thaws the actor,
//! routes the message through its tree and writes back everything the
//! delivery produced: the actor itself, spawned actors and outgoing
//! messages. Effects of a run whose write-back is rejected are dropped.

use crate::actors::{
    route, ActorTree, ChildSpawn, RootSpawn, SerializableActor, SerializationError, StepCatalog,
};
use crate::shuttle::ShuttleRegistry;
use crate::store::{Store, StoredWork};
use crate::RuntimeError;
use chrono::Utc;
use common::OperationTimer;
use peerloom_core::{Address, Message, Payload};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Outcome of one work-loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub actor: Address,
    /// The root finished or faulted and the actor was discarded
    pub root_died: bool,
    /// The write-back was rejected by a newer instance; effects were dropped
    pub superseded: bool,
    pub local_messages: usize,
    pub forwarded_messages: usize,
    pub dropped_messages: usize,
    pub spawned_roots: usize,
    pub spawned_children: usize,
}

impl IterationReport {
    fn new(actor: Address) -> Self {
        Self {
            actor,
            root_died: false,
            superseded: false,
            local_messages: 0,
            forwarded_messages: 0,
            dropped_messages: 0,
            spawned_roots: 0,
            spawned_children: 0,
        }
    }
}

/// A root spawn frozen and ready for `Store::create`.
struct PendingRoot {
    actor: SerializableActor,
    priming: Vec<Message>,
}

/// Work loop bound to one store and prefix.
#[derive(Clone)]
pub struct ActorRunnable {
    prefix: String,
    store: Arc<dyn Store>,
    catalog: Arc<StepCatalog>,
    shuttles: Arc<ShuttleRegistry>,
    idle_backoff: Duration,
}

impl ActorRunnable {
    pub fn new(
        prefix: impl Into<String>,
        store: Arc<dyn Store>,
        catalog: Arc<StepCatalog>,
        shuttles: Arc<ShuttleRegistry>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            store,
            catalog,
            shuttles,
            idle_backoff: Duration::from_millis(100),
        }
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Loop until `shutdown` fires. A running iteration is always completed;
    /// only the wait for new work is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(prefix = %self.prefix, "Work loop started");

        loop {
            let work = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                work = self.store.take() => work,
            };

            let result = match work {
                Ok(work) => self.process(work).await,
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(report) => trace!(
                    actor = %report.actor,
                    root_died = report.root_died,
                    superseded = report.superseded,
                    "Iteration complete"
                ),
                Err(e) => {
                    error!(prefix = %self.prefix, error = %e, "Iteration failed");
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.idle_backoff) => {}
                    }
                }
            }
        }

        info!(prefix = %self.prefix, "Work loop stopped");
    }

    /// Run exactly one iteration, waiting for work if there is none.
    pub async fn run_once(&self) -> Result<IterationReport, RuntimeError> {
        let work = self.store.take().await?;
        self.process(work).await
    }

    async fn process(&self, work: StoredWork) -> Result<IterationReport, RuntimeError> {
        let (message, frozen) = work.into_parts();
        let address = frozen.address().clone();
        let instance = frozen.checkpoint_instance();

        let mut timer = OperationTimer::new("actor_iteration");
        timer.add_field("actor", address.to_string());
        timer.add_field("message_type", message.payload().message_type().as_str());

        let result = self.deliver(message, frozen, &address, instance).await;
        timer.finish_with_result(&result);
        result
    }

    async fn deliver(
        &self,
        message: Message,
        frozen: SerializableActor,
        address: &Address,
        instance: u64,
    ) -> Result<IterationReport, RuntimeError> {
        let mut report = IterationReport::new(address.clone());

        let mut tree = match frozen.thaw(&self.catalog) {
            Ok(tree) => tree,
            Err(
                e @ (SerializationError::UnknownStepKind(_)
                | SerializationError::UnknownShortcircuitKind(_)),
            ) => {
                // another worker may know the kind: release the actor as it was
                error!(
                    actor = %address,
                    instance,
                    message_type = %message.payload().message_type(),
                    error = %e,
                    "Kind not in catalog; message dropped, actor kept"
                );
                let mut frozen = frozen;
                frozen.reset_checkpoint_updated();
                self.store.store(frozen).await?;
                return Err(e.into());
            }
            Err(e) => {
                error!(actor = %address, instance, error = %e, "Actor cannot be thawed; discarding");
                self.store.discard(address, instance).await?;
                return Err(e.into());
            }
        };
        tree.root_mut()
            .context_mut()
            .checkpoint_mut()
            .reset_updated();

        let mut root_died = route(&mut tree, &message, Utc::now());

        let new_children = tree.effects_mut().take_new_children();
        let new_roots = tree.effects_mut().take_new_roots();
        let step_outgoing = tree.effects_mut().take_outgoing();

        let mut outgoing = Vec::with_capacity(step_outgoing.len());
        if root_died {
            if !new_children.is_empty() {
                debug!(actor = %address, count = new_children.len(), "Dropping child spawns of finished actor");
            }
        } else {
            for spawn in new_children {
                if let Some(priming) = materialize_child(&mut tree, spawn) {
                    report.spawned_children += 1;
                    outgoing.extend(priming);
                }
            }
        }
        outgoing.extend(step_outgoing);

        let pending_roots = self.freeze_roots(new_roots);

        if !root_died {
            match SerializableActor::freeze(&tree) {
                Ok(frozen) => {
                    if !self.store.store(frozen).await? {
                        report.superseded = true;
                    }
                }
                Err(e) => {
                    error!(actor = %address, error = %e, "Actor cannot be frozen; terminating");
                    root_died = true;
                }
            }
        }

        if root_died {
            report.root_died = true;
            let before = outgoing.len();
            outgoing.retain(|m| !address.is_prefix_of(m.destination()));
            report.dropped_messages += before - outgoing.len();
            if !self.store.discard(address, instance).await? {
                report.superseded = true;
            }
        }

        if report.superseded {
            let dropped = outgoing.len()
                + pending_roots
                    .iter()
                    .map(|pending| pending.priming.len())
                    .sum::<usize>();
            debug!(
                actor = %address,
                instance,
                dropped,
                roots = pending_roots.len(),
                "Run superseded by checkpoint restore; dropping effects"
            );
            report.dropped_messages += dropped;
            return Ok(report);
        }

        for pending in pending_roots {
            let root = pending.actor.address().clone();
            match self.store.create(pending.actor).await {
                Ok(true) => {
                    debug!(actor = %root, parent = %address, "Root actor spawned");
                    report.spawned_roots += 1;
                    outgoing.extend(pending.priming);
                }
                Ok(false) => {
                    warn!(actor = %root, "Address already in use; spawn skipped");
                    report.dropped_messages += pending.priming.len();
                }
                Err(e) => {
                    warn!(actor = %root, error = %e, "Spawn failed");
                    report.dropped_messages += pending.priming.len();
                }
            }
        }

        self.dispatch(outgoing, &mut report).await?;
        Ok(report)
    }

    fn freeze_roots(&self, spawns: Vec<RootSpawn>) -> Vec<PendingRoot> {
        let mut pending = Vec::with_capacity(spawns.len());
        for spawn in spawns {
            let address = match Address::new([self.prefix.as_str(), spawn.id.as_str()]) {
                Ok(address) => address,
                Err(e) => {
                    warn!(id = %spawn.id, error = %e, "Invalid root id; spawn skipped");
                    continue;
                }
            };
            let priming = priming_messages(&address, spawn.priming);
            match SerializableActor::spawn(address.clone(), spawn.step) {
                Ok(actor) => pending.push(PendingRoot { actor, priming }),
                Err(e) => warn!(actor = %address, error = %e, "Root spawn cannot be frozen; skipped"),
            }
        }
        pending
    }

    /// Route messages by first segment: own prefix to the store, others to
    /// their shuttle.
    async fn dispatch(
        &self,
        outgoing: Vec<Message>,
        report: &mut IterationReport,
    ) -> Result<(), RuntimeError> {
        let mut by_prefix: BTreeMap<String, Vec<Message>> = BTreeMap::new();
        for message in outgoing {
            by_prefix
                .entry(message.destination_prefix().to_string())
                .or_default()
                .push(message);
        }

        for (prefix, messages) in by_prefix {
            let count = messages.len();
            if prefix == self.prefix {
                self.store.store_messages(messages).await?;
                report.local_messages += count;
                continue;
            }

            match self.shuttles.get(&prefix) {
                Some(shuttle) => match shuttle.send(messages).await {
                    Ok(()) => report.forwarded_messages += count,
                    Err(e) => {
                        warn!(prefix = %prefix, count, error = %e, "Shuttle failed; messages dropped");
                        report.dropped_messages += count;
                    }
                },
                None => {
                    warn!(prefix = %prefix, count, "No shuttle for prefix; messages dropped");
                    report.dropped_messages += count;
                }
            }
        }
        Ok(())
    }
}

/// Attach a spawned child to the live tree. Returns its priming messages.
fn materialize_child(tree: &mut ActorTree, spawn: ChildSpawn) -> Option<Vec<Message>> {
    let ChildSpawn {
        parent,
        id,
        step,
        priming,
    } = spawn;

    let Some(parent_id) = tree.find(&parent) else {
        debug!(parent = %parent, id = %id, "Parent gone before its child was created");
        return None;
    };
    match tree.add_child(parent_id, &id, step) {
        Ok(child) => {
            let address = tree.node(child)?.address().clone();
            Some(priming_messages(&address, priming))
        }
        Err(e) => {
            warn!(parent = %parent, id = %id, error = %e, "Child spawn skipped");
            None
        }
    }
}

fn priming_messages(address: &Address, priming: Vec<Payload>) -> Vec<Message> {
    priming
        .into_iter()
        .filter_map(|payload| match Message::new(address.clone(), address.clone(), payload) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(actor = %address, error = %e, "Dropping invalid priming message");
                None
            }
        })
        .collect()
}
