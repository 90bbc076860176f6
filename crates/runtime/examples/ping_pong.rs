//! Two actors bouncing a counter until it reaches a limit.
//!
//! Run with `PEERLOOM_LOG_LEVEL=debug` to follow every iteration.

use anyhow::Result;
use common::{init_structured_logging, LoggingConfig};
use runtime::actors::freeze_state;
use runtime::{
    ActorRuntime, Address, Context, FreezeSession, MemoryStore, Payload, RuntimeConfig,
    SerializationError, Step, StepCatalog, StepError, StepOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Serialize, Deserialize)]
struct Player {
    partner: Address,
    limit: u64,
}

impl Step for Player {
    fn kind(&self) -> &str {
        "player"
    }

    fn step(&mut self, ctx: &mut Context<'_>) -> Result<StepOutcome, StepError> {
        if ctx.in_message().is("serve") {
            ctx.allow(self.partner.clone(), false);
            ctx.out_to(self.partner.clone(), Payload::encode("ball", &0u64)?)?;
            return Ok(StepOutcome::Suspended);
        }
        if ctx.in_message().is("open") {
            ctx.allow(self.partner.clone(), false);
            return Ok(StepOutcome::Suspended);
        }

        let count: u64 = ctx.decode()?;
        info!(actor = %ctx.self_address(), count, "Ball received");
        if count >= self.limit {
            return Ok(StepOutcome::Finished);
        }
        ctx.reply(Payload::encode("ball", &(count + 1))?)?;
        Ok(StepOutcome::Suspended)
    }

    fn freeze(&self, _session: &FreezeSession) -> Result<serde_json::Value, SerializationError> {
        freeze_state(self)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging(LoggingConfig::from_env())?;

    let mut catalog = StepCatalog::new();
    catalog.register::<Player>("player");

    let store = Arc::new(MemoryStore::new());
    let runtime = ActorRuntime::new(RuntimeConfig::from_env(), store.clone(), catalog)?;
    let prefix = runtime.prefix().to_string();
    let ping = Address::new([prefix.as_str(), "ping"])?;
    let pong = Address::new([prefix.as_str(), "pong"])?;

    runtime
        .spawn_root(
            "pong",
            Player {
                partner: ping.clone(),
                limit: 10,
            },
            vec![Payload::signal("open")],
        )
        .await?;
    // pong must accept ping before the first ball is served
    runtime.runnable().run_once().await?;

    runtime
        .spawn_root(
            "ping",
            Player {
                partner: pong.clone(),
                limit: 10,
            },
            vec![Payload::signal("serve")],
        )
        .await?;

    runtime.start()?;
    while store.contains(&ping) && store.contains(&pong) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    runtime.shutdown().await?;

    info!("Rally finished");
    Ok(())
}
