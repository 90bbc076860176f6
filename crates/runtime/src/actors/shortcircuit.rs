//! Pre-step hooks keyed by message type
//!
//! A shortcircuit runs before a node's step for messages of one
//! [`MessageType`](peerloom_core::MessageType) and may skip or replace the
//! step entirely. Hooks are frozen with the tree, so every implementation is
//! registered in the [`StepCatalog`](super::StepCatalog) under its kind.

use super::context::Delivery;
use super::serialization::{freeze_state, SerializationError};
use peerloom_core::Address;
use serde::{Deserialize, Serialize};

/// What to do with a message instead of (or before) running the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortcircuitAction {
    /// Drop the message; the step does not run and the node stays alive
    Pass,
    /// Run the step as usual
    Process,
    /// Finish the node without running the step
    Terminate,
}

pub trait Shortcircuit: Send + Sync + 'static {
    /// Catalog key used to thaw the frozen hook.
    fn kind(&self) -> &str;

    fn evaluate(&self, delivery: &Delivery) -> ShortcircuitAction;

    fn freeze(&self) -> Result<serde_json::Value, SerializationError>;
}

/// Always answers with the same action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedShortcircuit {
    action: ShortcircuitAction,
}

impl FixedShortcircuit {
    pub const KIND: &'static str = "fixed";

    pub fn new(action: ShortcircuitAction) -> Self {
        Self { action }
    }
}

impl Shortcircuit for FixedShortcircuit {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn evaluate(&self, _delivery: &Delivery) -> ShortcircuitAction {
        self.action
    }

    fn freeze(&self) -> Result<serde_json::Value, SerializationError> {
        freeze_state(self)
    }
}

/// Picks an action depending on whether the source lies under `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePrefixShortcircuit {
    prefix: Address,
    matched: ShortcircuitAction,
    otherwise: ShortcircuitAction,
}

impl SourcePrefixShortcircuit {
    pub const KIND: &'static str = "source-prefix";

    pub fn new(prefix: Address, matched: ShortcircuitAction, otherwise: ShortcircuitAction) -> Self {
        Self {
            prefix,
            matched,
            otherwise,
        }
    }
}

impl Shortcircuit for SourcePrefixShortcircuit {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn evaluate(&self, delivery: &Delivery) -> ShortcircuitAction {
        if self.prefix.is_prefix_of(delivery.source()) {
            self.matched
        } else {
            self.otherwise
        }
    }

    fn freeze(&self) -> Result<serde_json::Value, SerializationError> {
        freeze_state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use peerloom_core::Payload;

    #[test]
    fn test_source_prefix_selects_action() {
        let hook = SourcePrefixShortcircuit::new(
            "gateway".parse().unwrap(),
            ShortcircuitAction::Terminate,
            ShortcircuitAction::Pass,
        );
        let from_gateway = Delivery::new(
            "gateway:timer".parse().unwrap(),
            "local:a".parse().unwrap(),
            Utc::now(),
            Payload::signal("kill"),
        );
        let from_peer = Delivery::new(
            "local:b".parse().unwrap(),
            "local:a".parse().unwrap(),
            Utc::now(),
            Payload::signal("kill"),
        );

        assert_eq!(hook.evaluate(&from_gateway), ShortcircuitAction::Terminate);
        assert_eq!(hook.evaluate(&from_peer), ShortcircuitAction::Pass);
    }

    #[test]
    fn test_fixed_freezes_to_json() {
        let hook = FixedShortcircuit::new(ShortcircuitAction::Pass);
        let frozen = hook.freeze().unwrap();
        let back: FixedShortcircuit = serde_json::from_value(frozen).unwrap();
        assert_eq!(back, hook);
    }
}
