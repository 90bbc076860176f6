//! Shared infrastructure for the peerloom crates.
//!
//! Currently this is the structured logging layer: every crate logs through
//! `tracing`, and binaries or test harnesses install a subscriber once with
//! [`init_structured_logging`].

pub mod structured_logging;

pub use structured_logging::{
    init_structured_logging, JsonLayer, LogRecord, LoggingConfig, OperationTimer, ProcessInfo,
};
