//! In-process [`Store`] implementation
//!
//! Everything lives behind one `parking_lot` mutex; waiting workers park on a
//! tokio [`Notify`]. Deadlines use tokio time so tests can pause the clock.

use super::{Store, StoreError, StoredWork};
use crate::actors::SerializableActor;
use async_trait::async_trait;
use parking_lot::Mutex;
use peerloom_core::{Address, Message};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
struct Slot {
    actor: SerializableActor,
    queue: VecDeque<Message>,
    leased: bool,
    /// Whether the address currently sits in the ready queue
    ready: bool,
    instance: u64,
    snapshot: Option<SerializableActor>,
    deadline: Option<Instant>,
}

impl Slot {
    fn new(actor: SerializableActor) -> Self {
        let instance = actor.checkpoint_instance();
        let mut slot = Self {
            actor,
            queue: VecDeque::new(),
            leased: false,
            ready: false,
            instance,
            snapshot: None,
            deadline: None,
        };
        slot.capture_checkpoint();
        slot
    }

    /// Take a new snapshot if the actor re-declared its checkpoint, then
    /// re-arm the deadline from now.
    fn capture_checkpoint(&mut self) {
        let checkpoint = self.actor.checkpoint();
        if checkpoint.updated() {
            let mut snapshot = self.actor.clone();
            snapshot.reset_checkpoint_updated();
            self.snapshot = Some(snapshot);
        }
        self.deadline = match (&self.snapshot, checkpoint.timeout()) {
            (Some(_), Some(timeout)) => Some(Instant::now() + timeout),
            _ => None,
        };
    }
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<Address, Slot>,
    ready: VecDeque<Address>,
}

impl State {
    /// Actor owning `destination`: the longest registered prefix.
    fn owner_of(&self, destination: &Address) -> Option<Address> {
        destination
            .prefixes()
            .find(|prefix| !prefix.is_empty() && self.slots.contains_key(*prefix))
            .and_then(|prefix| Address::new(prefix.iter().cloned()).ok())
    }

    fn mark_ready(&mut self, address: &Address) {
        if let Some(slot) = self.slots.get_mut(address) {
            if !slot.leased && !slot.ready && !slot.queue.is_empty() {
                slot.ready = true;
                self.ready.push_back(address.clone());
            }
        }
    }

    fn next_eviction(&mut self, now: Instant) -> Option<StoredWork> {
        let address = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.deadline.is_some_and(|deadline| deadline <= now))
            .min_by_key(|(_, slot)| slot.deadline)
            .map(|(address, _)| address.clone())?;
        let slot = self.slots.get_mut(&address)?;
        slot.deadline = None;
        let mut restored = slot.snapshot.clone()?;
        let payload = restored.checkpoint().payload().cloned()?;

        slot.instance += 1;
        restored.set_checkpoint_instance(slot.instance);
        restored.clear_checkpoint_timeout();
        slot.actor = restored.clone();
        slot.leased = true;

        info!(
            actor = %address,
            instance = slot.instance,
            "Checkpoint deadline elapsed; restoring actor"
        );

        let message = match Message::new(address.clone(), address.clone(), payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(actor = %address, error = %e, "Checkpoint payload is not deliverable");
                slot.leased = false;
                return None;
            }
        };
        StoredWork::new(message, restored).ok()
    }

    fn next_ready(&mut self) -> Option<StoredWork> {
        while let Some(address) = self.ready.pop_front() {
            let Some(slot) = self.slots.get_mut(&address) else {
                continue;
            };
            slot.ready = false;
            if slot.leased {
                continue;
            }
            let Some(message) = slot.queue.pop_front() else {
                continue;
            };
            slot.leased = true;
            trace!(actor = %address, remaining = slot.queue.len(), "Leasing actor");
            match StoredWork::new(message, slot.actor.clone()) {
                Ok(work) => return Some(work),
                Err(e) => {
                    warn!(actor = %address, error = %e, "Dropping misrouted message");
                    slot.leased = false;
                    self.mark_ready(&address);
                }
            }
        }
        None
    }

    fn nearest_deadline(&self) -> Option<Instant> {
        self.slots.values().filter_map(|slot| slot.deadline).min()
    }
}

/// Reference store keeping all actors in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current frozen actor at `address`.
    pub fn actor(&self, address: &Address) -> Option<SerializableActor> {
        self.state
            .lock()
            .slots
            .get(address)
            .map(|slot| slot.actor.clone())
    }

    /// Number of messages waiting for `address`.
    pub fn queued(&self, address: &Address) -> usize {
        self.state
            .lock()
            .slots
            .get(address)
            .map(|slot| slot.queue.len())
            .unwrap_or(0)
    }

    /// Messages waiting for `address`, oldest first.
    pub fn pending(&self, address: &Address) -> Vec<Message> {
        self.state
            .lock()
            .slots
            .get(address)
            .map(|slot| slot.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.state.lock().slots.contains_key(address)
    }

    pub fn instance(&self, address: &Address) -> Option<u64> {
        self.state.lock().slots.get(address).map(|slot| slot.instance)
    }

    pub fn is_leased(&self, address: &Address) -> bool {
        self.state
            .lock()
            .slots
            .get(address)
            .is_some_and(|slot| slot.leased)
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn take(&self) -> Result<StoredWork, StoreError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if let Some(work) = state.next_eviction(now) {
                    return Ok(work);
                }
                if let Some(work) = state.next_ready() {
                    return Ok(work);
                }
                state.nearest_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn store(&self, actor: SerializableActor) -> Result<bool, StoreError> {
        let address = actor.address().clone();
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(&address) else {
            debug!(actor = %address, "Store for unknown actor ignored");
            return Ok(false);
        };
        if slot.instance != actor.checkpoint_instance() {
            debug!(
                actor = %address,
                current = slot.instance,
                carried = actor.checkpoint_instance(),
                "Stale write rejected"
            );
            return Ok(false);
        }

        slot.actor = actor;
        slot.leased = false;
        slot.capture_checkpoint();
        state.mark_ready(&address);
        drop(state);

        self.notify.notify_waiters();
        Ok(true)
    }

    async fn create(&self, actor: SerializableActor) -> Result<bool, StoreError> {
        let address = actor.address().clone();
        let mut state = self.state.lock();
        if state.slots.contains_key(&address) {
            debug!(actor = %address, "Address already in use");
            return Ok(false);
        }
        let slot = Slot::new(actor);
        let armed = slot.deadline.is_some();
        state.slots.insert(address.clone(), slot);
        drop(state);

        debug!(actor = %address, "Actor created");
        if armed {
            self.notify.notify_waiters();
        }
        Ok(true)
    }

    async fn store_messages(&self, messages: Vec<Message>) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let mut woke = false;
        for message in messages {
            let Some(owner) = state.owner_of(message.destination()) else {
                warn!(
                    destination = %message.destination(),
                    message_type = %message.payload().message_type(),
                    "Dropping message for unknown actor"
                );
                continue;
            };
            if let Some(slot) = state.slots.get_mut(&owner) {
                slot.queue.push_back(message);
            }
            state.mark_ready(&owner);
            woke = true;
        }
        drop(state);

        if woke {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn discard(&self, address: &Address, instance: u64) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        match state.slots.get(address) {
            None => Ok(true),
            Some(slot) if slot.instance != instance => {
                debug!(
                    actor = %address,
                    current = slot.instance,
                    carried = instance,
                    "Stale discard rejected"
                );
                Ok(false)
            }
            Some(_) => {
                state.slots.remove(address);
                debug!(actor = %address, "Actor discarded");
                Ok(true)
            }
        }
    }
}
