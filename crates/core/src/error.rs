use thiserror::Error;

/// Precondition violations on [`Address`](crate::Address) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address segment must not be empty")]
    EmptySegment,

    #[error("{prefix} is not a prefix of {address}")]
    NotAPrefix { prefix: String, address: String },

    #[error("cannot remove {count} segments from an address of size {size}")]
    SuffixTooLong { count: usize, size: usize },

    #[error("malformed address text {text:?}: {reason}")]
    Malformed { text: String, reason: String },
}

/// Errors raised while building or decoding messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message destination must not be empty")]
    EmptyDestination,

    #[error("message type must not be empty")]
    EmptyType,

    #[error("payload of type {message_type} could not be encoded: {source}")]
    Encode {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload of type {message_type} could not be decoded: {source}")]
    Decode {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}
