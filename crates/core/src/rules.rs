//! Access control over source addresses
//!
//! A [`RuleSet`] decides whether a message from a given source may reach an
//! actor. Rules are keyed by address; evaluation walks the source address
//! from its full length down to the empty prefix and the first applicable
//! rule wins, so the most specific rule always takes precedence.

use crate::address::Address;
use crate::message::MessageType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Outcome of a rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    Allow,
    Reject,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Allow => write!(f, "allow"),
            AccessType::Reject => write!(f, "reject"),
        }
    }
}

/// A single access rule attached to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Whether the rule also covers addresses below the keyed address
    pub include_children: bool,
    pub access: AccessType,
    /// Message types the rule applies to; empty means every type
    pub allowed_types: BTreeSet<MessageType>,
}

impl Rule {
    fn applies_to(&self, message_type: &MessageType) -> bool {
        self.allowed_types.is_empty() || self.allowed_types.contains(message_type)
    }
}

/// Longest-prefix access rules with a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    default_access: AccessType,
    rules: BTreeMap<Address, Rule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(AccessType::Reject)
    }
}

impl RuleSet {
    pub fn new(default_access: AccessType) -> Self {
        Self {
            default_access,
            rules: BTreeMap::new(),
        }
    }

    /// Reject everything except messages whose source is exactly `owner`.
    pub fn owner_only(owner: &Address) -> Self {
        let mut rules = Self::new(AccessType::Reject);
        rules.allow(owner.clone(), false);
        rules
    }

    pub fn default_access(&self) -> AccessType {
        self.default_access
    }

    pub fn rule(&self, address: &Address) -> Option<&Rule> {
        self.rules.get(address)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decide whether `source` may deliver a message of `message_type`.
    pub fn evaluate(&self, source: &Address, message_type: &MessageType) -> AccessType {
        let full = source.size();
        for prefix in source.prefixes() {
            let Some(rule) = self.rules.get(prefix) else {
                continue;
            };
            let covers_source = prefix.len() == full || rule.include_children;
            if covers_source && rule.applies_to(message_type) {
                return rule.access;
            }
        }
        self.default_access
    }

    /// Allow every message type from `address` (and below it when
    /// `include_children`).
    pub fn allow(&mut self, address: Address, include_children: bool) {
        self.set(address, include_children, AccessType::Allow, BTreeSet::new());
    }

    /// Allow only the listed message types from `address`.
    pub fn allow_types<I, T>(&mut self, address: Address, include_children: bool, types: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageType>,
    {
        let types = types.into_iter().map(Into::into).collect();
        self.set(address, include_children, AccessType::Allow, types);
    }

    pub fn reject(&mut self, address: Address, include_children: bool) {
        self.set(address, include_children, AccessType::Reject, BTreeSet::new());
    }

    pub fn reject_types<I, T>(&mut self, address: Address, include_children: bool, types: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageType>,
    {
        let types = types.into_iter().map(Into::into).collect();
        self.set(address, include_children, AccessType::Reject, types);
    }

    /// Allow everything and forget every configured rule.
    pub fn allow_all(&mut self) {
        self.default_access = AccessType::Allow;
        self.rules.clear();
    }

    /// Reject everything and forget every configured rule.
    pub fn reject_all(&mut self) {
        self.default_access = AccessType::Reject;
        self.rules.clear();
    }

    pub fn remove(&mut self, address: &Address) -> Option<Rule> {
        self.rules.remove(address)
    }

    fn set(
        &mut self,
        address: Address,
        include_children: bool,
        access: AccessType,
        allowed_types: BTreeSet<MessageType>,
    ) {
        tracing::trace!(address = %address, include_children, access = %access, "Access rule set");
        self.rules.insert(
            address,
            Rule {
                include_children,
                access,
                allowed_types,
            },
        );
    }
}
