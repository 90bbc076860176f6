//! Core domain types for peerloom
//!
//! Everything an actor is identified by, talks with, or is protected by:
//!
//! - **Address**: ordered path segments naming actors and address spaces
//! - **Payload / Message**: type-tagged message bodies and their envelopes
//! - **RuleSet**: longest-prefix access control over source addresses

pub mod address;
pub mod error;
pub mod message;
pub mod rules;

pub use address::Address;
pub use error::{AddressError, MessageError};
pub use message::{Message, MessageType, Payload};
pub use rules::{AccessType, Rule, RuleSet};
