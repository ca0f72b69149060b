//! Shared types and utilities for callbridge components.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{BridgeError, Result};
pub use types::{CallVerdict, CdrRecord, RecordKind, RecordingJob};
