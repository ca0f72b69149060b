//! Core types shared across callbridge components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of buffered record awaiting delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Finished-call detail record
    Cdr,
    /// Recorded-call upload job
    Recording,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Cdr => "cdr",
            RecordKind::Recording => "recording",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction verdict assigned to a finished call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallVerdict {
    /// External caller reached an inner number
    Incoming,
    /// Inner number dialed out
    Outgoing,
    /// Both legs are inner numbers
    Inner,
    /// Incoming call with a withheld caller id
    HiddenIncoming,
    /// Legs did not match any recognized shape
    Unknown,
}

impl CallVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallVerdict::Incoming => "incoming",
            CallVerdict::Outgoing => "outgoing",
            CallVerdict::Inner => "inner",
            CallVerdict::HiddenIncoming => "hidden_incoming",
            CallVerdict::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CallVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Call detail record buffered for delivery to the owning tenant backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdrRecord {
    /// Switch-assigned unique call id
    pub unique_id: String,
    /// Owning tenant code
    pub tenant: String,
    /// Employee extension that took part in the call
    pub inner_number: String,
    /// The other leg of the call
    pub opponent_number: String,
    pub direction: CallVerdict,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u32,
    /// Switch disposition, e.g. "ANSWERED"
    pub disposition: String,
}

/// Recorded-call upload job buffered for transcoding and archival
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingJob {
    /// Switch-assigned unique call id
    pub unique_id: String,
    /// Owning tenant code
    pub tenant: String,
    /// Raw recording file name inside the calls directory
    pub wav_file: String,
}
