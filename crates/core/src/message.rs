//! Messages exchanged between actors
//!
//! A [`Payload`] is a JSON body tagged with an explicit [`MessageType`]. The
//! tag is what access rules and shortcircuit hooks dispatch on, so payload
//! types never need to be inspected structurally.

use crate::address::Address;
use crate::error::MessageError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Explicit type tag of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// Type-tagged message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    message_type: MessageType,
    body: serde_json::Value,
}

impl Payload {
    pub fn new(message_type: impl Into<MessageType>, body: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            body,
        }
    }

    /// Payload without a body, for signal-like messages.
    pub fn signal(message_type: impl Into<MessageType>) -> Self {
        Self::new(message_type, serde_json::Value::Null)
    }

    /// Encode any serializable value under the given tag.
    pub fn encode<T: Serialize>(
        message_type: impl Into<MessageType>,
        value: &T,
    ) -> Result<Self, MessageError> {
        let message_type = message_type.into();
        let body = serde_json::to_value(value).map_err(|source| MessageError::Encode {
            message_type: message_type.to_string(),
            source,
        })?;
        Ok(Self { message_type, body })
    }

    /// Decode the body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_value(self.body.clone()).map_err(|source| MessageError::Decode {
            message_type: self.message_type.to_string(),
            source,
        })
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn is(&self, message_type: &str) -> bool {
        self.message_type.as_str() == message_type
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }
}

/// A payload in flight from `source` to `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    source: Address,
    destination: Address,
    payload: Payload,
}

impl Message {
    /// Fails when `destination` is empty: such a message could never be routed.
    pub fn new(
        source: Address,
        destination: Address,
        payload: Payload,
    ) -> Result<Self, MessageError> {
        if destination.is_empty() {
            return Err(MessageError::EmptyDestination);
        }
        if payload.message_type().as_str().is_empty() {
            return Err(MessageError::EmptyType);
        }
        Ok(Self {
            source,
            destination,
            payload,
        })
    }

    pub fn source(&self) -> &Address {
        &self.source
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// First segment of the destination: the address space the message is
    /// headed for.
    pub fn destination_prefix(&self) -> &str {
        self.destination.first().unwrap_or_default()
    }

    pub fn into_parts(self) -> (Address, Address, Payload) {
        (self.source, self.destination, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_encode_decode_payload() {
        let payload = Payload::encode("ping", &Ping { seq: 7 }).unwrap();
        assert!(payload.is("ping"));
        assert_eq!(payload.decode::<Ping>().unwrap(), Ping { seq: 7 });
    }

    #[test]
    fn test_decode_wrong_shape_fails() {
        let payload = Payload::new("ping", serde_json::json!("not a struct"));
        let err = payload.decode::<Ping>().unwrap_err();
        assert!(matches!(err, MessageError::Decode { .. }));
        assert!(err.to_string().contains("ping"));
    }

    #[test]
    fn test_message_requires_destination() {
        let result = Message::new(
            "local:a".parse().unwrap(),
            Address::empty(),
            Payload::signal("ping"),
        );
        assert!(matches!(result, Err(MessageError::EmptyDestination)));
    }

    #[test]
    fn test_message_requires_type() {
        let result = Message::new(
            "local:a".parse().unwrap(),
            "local:b".parse().unwrap(),
            Payload::signal(""),
        );
        assert!(matches!(result, Err(MessageError::EmptyType)));
    }

    #[test]
    fn test_destination_prefix() {
        let message = Message::new(
            "local:a".parse().unwrap(),
            "gateway:timer".parse().unwrap(),
            Payload::signal("tick"),
        )
        .unwrap();
        assert_eq!(message.destination_prefix(), "gateway");
    }
}
