//! Message delivery through an actor tree
//!
//! Every message enters a tree at its root and walks down the destination
//! address one segment at a time. Nodes that intercept see the message on
//! the way down and decide, through their [`SuspendMode`], whether it goes
//! further and whether they want it back afterwards.

use super::context::{Context, Delivery};
use super::shortcircuit::ShortcircuitAction;
use super::tree::{ActorNode, ActorTree, NodeId};
use super::{StepError, StepOutcome, SuspendMode};
use chrono::{DateTime, Utc};
use peerloom_core::{AccessType, Message};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace, warn};

/// Control message updating the root checkpoint timeout. Body: milliseconds.
pub const CHECKPOINT_TIMEOUT_TYPE: &str = "peerloom.checkpoint-timeout";

/// What one invoke did to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Invoked {
    /// The node is still in the tree
    Alive,
    /// A child finished and was removed with its subtree
    Removed,
    /// The root finished or faulted
    Done,
}

/// Deliver `message` to `tree`. Returns `true` when the root is done.
pub fn route(tree: &mut ActorTree, message: &Message, time: DateTime<Utc>) -> bool {
    let delivery = Delivery::from_message(message, time);

    if delivery.message_type().as_str() == CHECKPOINT_TIMEOUT_TYPE
        && delivery.destination() == tree.address()
    {
        apply_checkpoint_timeout(tree, &delivery);
        return false;
    }

    route_node(tree, NodeId::ROOT, &delivery)
}

fn apply_checkpoint_timeout(tree: &mut ActorTree, delivery: &Delivery) {
    let root = tree.root_mut();
    let address = root.address().clone();

    if root
        .context()
        .rules()
        .evaluate(delivery.source(), delivery.message_type())
        == AccessType::Reject
    {
        warn!(
            actor = %address,
            from = %delivery.source(),
            "Checkpoint timeout update rejected by access rules"
        );
        return;
    }

    match delivery.payload().decode::<u64>() {
        Ok(timeout_ms) => {
            debug!(actor = %address, timeout_ms, "Checkpoint timeout updated");
            root.context_mut().checkpoint_mut().set_timeout_ms(timeout_ms);
        }
        Err(e) => {
            warn!(
                actor = %address,
                body = %delivery.payload().body(),
                error = %e,
                "Dropping malformed checkpoint timeout message"
            );
        }
    }
}

fn route_node(tree: &mut ActorTree, id: NodeId, delivery: &Delivery) -> bool {
    let Some(node) = tree.node(id) else {
        return false;
    };
    let self_address = node.address().clone();
    let intercepts = node.context().intercepts();

    if delivery.destination() == &self_address {
        set_mode(tree, id, SuspendMode::Release);
        let invoked = invoke(tree, id, delivery);
        set_mode(tree, id, SuspendMode::Release);
        return invoked == Invoked::Done;
    }

    let mut mode = SuspendMode::Release;
    if intercepts {
        set_mode(tree, id, SuspendMode::Release);
        match invoke(tree, id, delivery) {
            Invoked::Done => {
                set_mode(tree, id, SuspendMode::Release);
                return true;
            }
            Invoked::Removed => return false,
            Invoked::Alive => {}
        }
        mode = current_mode(tree, id);
        if mode == SuspendMode::Release {
            return false;
        }
        trace!(actor = %self_address, %mode, "Forwarding intercepted message");
    }

    let next = delivery
        .destination()
        .next_after(&self_address)
        .and_then(|segment| tree.child_of(id, segment));
    match next {
        Some(child) => {
            if route_node(tree, child, delivery) {
                return true;
            }
        }
        None => {
            debug!(
                actor = %self_address,
                destination = %delivery.destination(),
                "No recipient for message"
            );
        }
    }

    if intercepts && mode == SuspendMode::ForwardAndReturn {
        set_mode(tree, id, SuspendMode::Release);
        match invoke(tree, id, delivery) {
            Invoked::Done => {
                set_mode(tree, id, SuspendMode::Release);
                return true;
            }
            Invoked::Removed => return false,
            Invoked::Alive => {}
        }
        let requested = current_mode(tree, id);
        set_mode(tree, id, SuspendMode::Release);
        if requested != SuspendMode::Release {
            error!(
                actor = %self_address,
                mode = %requested,
                "Forward requested after the message already returned; terminating actor"
            );
            return true;
        }
        return false;
    }

    set_mode(tree, id, SuspendMode::Release);
    false
}

fn current_mode(tree: &ActorTree, id: NodeId) -> SuspendMode {
    tree.node(id)
        .map(|node| node.context().mode())
        .unwrap_or_default()
}

fn set_mode(tree: &mut ActorTree, id: NodeId, mode: SuspendMode) {
    if let Some(node) = tree.node_mut(id) {
        node.context_mut().set_mode(mode);
    }
}

/// Run the node's hooks and step for `delivery`.
fn invoke(tree: &mut ActorTree, id: NodeId, delivery: &Delivery) -> Invoked {
    let is_root = id == tree.root_id();
    let Some((node, effects)) = tree.split_node(id) else {
        return Invoked::Alive;
    };
    let ActorNode { step, context, .. } = node;
    let address = context.self_address().clone();

    if context
        .rules()
        .evaluate(delivery.source(), delivery.message_type())
        == AccessType::Reject
    {
        warn!(
            actor = %address,
            from = %delivery.source(),
            message_type = %delivery.message_type(),
            "Message rejected by access rules"
        );
        return Invoked::Alive;
    }

    let action = context
        .shortcircuit(delivery.message_type())
        .map(|hook| hook.evaluate(delivery))
        .unwrap_or(ShortcircuitAction::Process);

    let outcome = match action {
        ShortcircuitAction::Pass => {
            trace!(actor = %address, message_type = %delivery.message_type(), "Shortcircuit passed message");
            return Invoked::Alive;
        }
        ShortcircuitAction::Terminate => {
            debug!(actor = %address, message_type = %delivery.message_type(), "Shortcircuit terminated actor");
            Ok(StepOutcome::Finished)
        }
        ShortcircuitAction::Process => {
            let mut ctx = Context::new(context, effects, delivery, is_root);
            catch_unwind(AssertUnwindSafe(|| step.step(&mut ctx)))
                .unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic.as_ref()))))
        }
    };

    match outcome {
        Ok(StepOutcome::Suspended) => Invoked::Alive,
        Ok(StepOutcome::Finished) if is_root => {
            debug!(actor = %address, "Root actor finished");
            Invoked::Done
        }
        Ok(StepOutcome::Finished) => {
            if let Err(e) = tree.remove(id) {
                error!(actor = %address, error = %e, "Failed to remove finished child");
            }
            Invoked::Removed
        }
        Err(e) => {
            error!(
                actor = %address,
                destination = %delivery.destination(),
                error = %e,
                "Step failed; terminating actor"
            );
            Invoked::Done
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
