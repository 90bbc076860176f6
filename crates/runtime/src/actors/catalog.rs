//! Registry of thaw functions
//!
//! Frozen steps and shortcircuits carry only a kind string and a JSON state.
//! The [`StepCatalog`] maps each kind back to the code that rebuilds a live
//! value from that state. Every worker that may load an actor must share a
//! catalog covering all kinds the actor's tree can contain.

use super::serialization::{FrozenShortcircuit, FrozenStep, SerializationError, ThawSession};
use super::shortcircuit::{FixedShortcircuit, Shortcircuit, SourcePrefixShortcircuit};
use super::Step;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

type StepFactory =
    Box<dyn Fn(serde_json::Value, &ThawSession) -> Result<Box<dyn Step>, SerializationError> + Send + Sync>;
type ShortcircuitFactory =
    Box<dyn Fn(serde_json::Value) -> Result<Box<dyn Shortcircuit>, SerializationError> + Send + Sync>;

pub struct StepCatalog {
    steps: HashMap<String, StepFactory>,
    shortcircuits: HashMap<String, ShortcircuitFactory>,
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StepCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps: Vec<_> = self.steps.keys().collect();
        steps.sort();
        let mut shortcircuits: Vec<_> = self.shortcircuits.keys().collect();
        shortcircuits.sort();
        f.debug_struct("StepCatalog")
            .field("steps", &steps)
            .field("shortcircuits", &shortcircuits)
            .finish()
    }
}

impl StepCatalog {
    /// A catalog that already knows the built-in shortcircuits.
    pub fn new() -> Self {
        let mut catalog = Self {
            steps: HashMap::new(),
            shortcircuits: HashMap::new(),
        };
        catalog.register_shortcircuit::<FixedShortcircuit>(FixedShortcircuit::KIND);
        catalog.register_shortcircuit::<SourcePrefixShortcircuit>(SourcePrefixShortcircuit::KIND);
        catalog
    }

    /// Register a step whose frozen state is its own serde form.
    pub fn register<T>(&mut self, kind: &str) -> &mut Self
    where
        T: Step + DeserializeOwned,
    {
        let owned = kind.to_string();
        self.register_with(kind, move |state, _session| {
            let step: T = serde_json::from_value(state).map_err(|source| {
                SerializationError::State {
                    kind: owned.clone(),
                    source,
                }
            })?;
            Ok(Box::new(step) as Box<dyn Step>)
        })
    }

    /// Register a custom thaw function, for steps that hold [`NodeRef`]s or
    /// need more than plain deserialization.
    ///
    /// [`NodeRef`]: super::NodeRef
    pub fn register_with<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(serde_json::Value, &ThawSession) -> Result<Box<dyn Step>, SerializationError>
            + Send
            + Sync
            + 'static,
    {
        if self.steps.insert(kind.to_string(), Box::new(factory)).is_some() {
            debug!(kind, "Replacing registered step kind");
        }
        self
    }

    pub fn register_shortcircuit<T>(&mut self, kind: &str) -> &mut Self
    where
        T: Shortcircuit + DeserializeOwned,
    {
        let owned = kind.to_string();
        let factory: ShortcircuitFactory = Box::new(move |state| {
            let hook: T = serde_json::from_value(state).map_err(|source| {
                SerializationError::State {
                    kind: owned.clone(),
                    source,
                }
            })?;
            Ok(Box::new(hook) as Box<dyn Shortcircuit>)
        });
        self.shortcircuits.insert(kind.to_string(), factory);
        self
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.steps.contains_key(kind)
    }

    pub fn knows_shortcircuit(&self, kind: &str) -> bool {
        self.shortcircuits.contains_key(kind)
    }

    pub fn thaw_step(
        &self,
        frozen: &FrozenStep,
        session: &ThawSession,
    ) -> Result<Box<dyn Step>, SerializationError> {
        let factory = self
            .steps
            .get(&frozen.kind)
            .ok_or_else(|| SerializationError::UnknownStepKind(frozen.kind.clone()))?;
        factory(frozen.state.clone(), session)
    }

    pub fn thaw_shortcircuit(
        &self,
        frozen: &FrozenShortcircuit,
    ) -> Result<Box<dyn Shortcircuit>, SerializationError> {
        let factory = self
            .shortcircuits
            .get(&frozen.kind)
            .ok_or_else(|| SerializationError::UnknownShortcircuitKind(frozen.kind.clone()))?;
        factory(frozen.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::shortcircuit::ShortcircuitAction;

    #[test]
    fn test_builtin_shortcircuits_registered() {
        let catalog = StepCatalog::new();
        assert!(catalog.knows_shortcircuit("fixed"));
        assert!(catalog.knows_shortcircuit("source-prefix"));
        assert!(!catalog.knows("fixed"));

        let frozen = FrozenShortcircuit {
            kind: "fixed".to_string(),
            state: FixedShortcircuit::new(ShortcircuitAction::Pass).freeze().unwrap(),
        };
        let hook = catalog.thaw_shortcircuit(&frozen).unwrap();
        assert_eq!(hook.kind(), "fixed");
    }

    #[test]
    fn test_bad_state_names_the_kind() {
        let catalog = StepCatalog::new();
        let frozen = FrozenShortcircuit {
            kind: "fixed".to_string(),
            state: serde_json::json!({"action": "Explode"}),
        };
        let err = catalog.thaw_shortcircuit(&frozen).err().unwrap();
        assert!(matches!(err, SerializationError::State { kind, .. } if kind == "fixed"));
    }

    #[test]
    fn test_unknown_shortcircuit_kind() {
        let catalog = StepCatalog::new();
        let frozen = FrozenShortcircuit {
            kind: "mystery".to_string(),
            state: serde_json::Value::Null,
        };
        assert!(matches!(
            catalog.thaw_shortcircuit(&frozen),
            Err(SerializationError::UnknownShortcircuitKind(_))
        ));
    }
}
