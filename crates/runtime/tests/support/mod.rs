//! Steps and helpers shared by the integration tests

#![allow(dead_code)]

use anyhow::Result;
use runtime::actors::freeze_state;
use runtime::{
    Address, ActorTree, Context, FreezeSession, MemoryStore, Message, Payload,
    SerializableActor, SerializationError, Step, StepCatalog, StepError, StepOutcome, Store,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Route runtime logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(text: &str) -> Address {
    text.parse().expect("valid address")
}

pub fn message(source: &str, destination: &str, tag: &str) -> Message {
    Message::new(addr(source), addr(destination), Payload::signal(tag)).expect("valid message")
}

/// Sends `x` to `target` for every message it handles.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Forwarder {
    pub target: Option<Address>,
    pub handled: u32,
}

impl Step for Forwarder {
    fn kind(&self) -> &str {
        "forwarder"
    }

    fn step(&mut self, ctx: &mut Context<'_>) -> Result<StepOutcome, StepError> {
        self.handled += 1;
        if let Some(target) = self.target.clone() {
            ctx.out_to(target, Payload::signal("x"))?;
        }
        Ok(StepOutcome::Suspended)
    }

    fn freeze(&self, _session: &FreezeSession) -> Result<serde_json::Value, SerializationError> {
        freeze_state(self)
    }
}

/// Records message types. Opens itself to everyone on the first message and
/// finishes on `stop`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Recorder {
    pub seen: Vec<String>,
}

impl Step for Recorder {
    fn kind(&self) -> &str {
        "recorder"
    }

    fn step(&mut self, ctx: &mut Context<'_>) -> Result<StepOutcome, StepError> {
        self.seen.push(ctx.in_message().message_type().to_string());
        ctx.allow_all();
        if ctx.in_message().is("stop") {
            return Ok(StepOutcome::Finished);
        }
        Ok(StepOutcome::Suspended)
    }

    fn freeze(&self, _session: &FreezeSession) -> Result<serde_json::Value, SerializationError> {
        freeze_state(self)
    }
}

/// Grows children and roots on command.
///
/// - `spawn`: child `c1` primed with `hello`
/// - `spawn-and-finish`: child `c1`, then finish
/// - `root`: independent root `spawned` primed with `hello`
/// - `root-and-finish`: same, then finish
/// - `fail`: returns an error
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Parent;

impl Step for Parent {
    fn kind(&self) -> &str {
        "parent"
    }

    fn step(&mut self, ctx: &mut Context<'_>) -> Result<StepOutcome, StepError> {
        let tag = ctx.in_message().message_type().to_string();
        match tag.as_str() {
            "spawn" => {
                ctx.child("c1", Recorder::default(), vec![Payload::signal("hello")])?;
                Ok(StepOutcome::Suspended)
            }
            "spawn-and-finish" => {
                ctx.child("c1", Recorder::default(), vec![Payload::signal("hello")])?;
                Ok(StepOutcome::Finished)
            }
            "root" => {
                ctx.root("spawned", Recorder::default(), vec![Payload::signal("hello")])?;
                Ok(StepOutcome::Suspended)
            }
            "root-and-finish" => {
                ctx.root("spawned", Recorder::default(), vec![Payload::signal("hello")])?;
                ctx.out_to(ctx.self_address().clone(), Payload::signal("too-late"))?;
                Ok(StepOutcome::Finished)
            }
            "fail" => Err(StepError::Failed("asked to fail".to_string())),
            _ => Ok(StepOutcome::Suspended),
        }
    }

    fn freeze(&self, _session: &FreezeSession) -> Result<serde_json::Value, SerializationError> {
        freeze_state(self)
    }
}

/// Declares a checkpoint on `work` and records what it sees.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Checkpointer {
    pub seen: Vec<String>,
}

impl Step for Checkpointer {
    fn kind(&self) -> &str {
        "checkpointer"
    }

    fn step(&mut self, ctx: &mut Context<'_>) -> Result<StepOutcome, StepError> {
        self.seen.push(ctx.in_message().message_type().to_string());
        if ctx.in_message().is("work") {
            ctx.checkpoint(Payload::signal("resume"), Duration::from_secs(5));
        }
        Ok(StepOutcome::Suspended)
    }

    fn freeze(&self, _session: &FreezeSession) -> Result<serde_json::Value, SerializationError> {
        freeze_state(self)
    }
}

pub fn catalog() -> StepCatalog {
    let mut catalog = StepCatalog::new();
    catalog
        .register::<Forwarder>("forwarder")
        .register::<Recorder>("recorder")
        .register::<Parent>("parent")
        .register::<Checkpointer>("checkpointer");
    catalog
}

/// Create a root at `address` that accepts messages from anyone.
pub async fn create_open(store: &MemoryStore, address: &str, step: impl Step) -> Result<()> {
    let mut tree = ActorTree::new(addr(address), Box::new(step));
    tree.root_mut().context_mut().rules_mut().allow_all();
    let created = store.create(SerializableActor::freeze(&tree)?).await?;
    anyhow::ensure!(created, "{} already exists", address);
    Ok(())
}

/// Frozen state of the node at `index` of the actor at `address`.
pub fn step_state(store: &MemoryStore, address: &str, index: usize) -> Option<serde_json::Value> {
    store
        .actor(&addr(address))
        .and_then(|actor| actor.nodes().get(index).map(|node| node.step.state.clone()))
}
