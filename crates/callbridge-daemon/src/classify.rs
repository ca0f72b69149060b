//! Call-direction classification from raw channel legs
//!
//! A channel leg such as `SIP/1023-00000f5c` carries the extension token of
//! an inner number. Classification looks at which legs of a finished call
//! belong to inner numbers and derives the call direction plus the numbers
//! worth reporting. Pure and deterministic, no collaborators.

use callbridge_common::CallVerdict;
use once_cell::sync::Lazy;
use regex::Regex;

/// Opponent-number sentinel for calls with a withheld caller id
pub const HIDDEN_NUMBER: &str = "xxxx";

// Technology prefix, extension token (2-4 digits, or 4 digits plus a
// two-letter site suffix), a non-digit separator, then the call-leg suffix.
static CHANNEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+/(\d{2,4}|\d{4}[A-Za-z]{2})\D*-.+$").unwrap());

/// Outcome of classifying one finished call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub inner_number: String,
    pub opponent_number: String,
    pub verdict: CallVerdict,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            inner_number: String::new(),
            opponent_number: String::new(),
            verdict: CallVerdict::Unknown,
        }
    }

    fn new(inner: &str, opponent: &str, verdict: CallVerdict) -> Self {
        Self {
            inner_number: inner.to_string(),
            opponent_number: opponent.to_string(),
            verdict,
        }
    }
}

/// Extension token of a channel leg, if the leg belongs to an inner number
pub fn inner_token(channel: &str) -> Option<&str> {
    CHANNEL_RE
        .captures(channel)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Classify a finished call from its raw channel legs and caller fields.
///
/// `origin_channel`/`dest_channel` are the two raw legs, `source_number` is
/// the caller number as seen by the switch, `dialed_destination` is what an
/// inner number dialed, and `caller_id` is the presented caller id. An
/// [`CallVerdict::Unknown`] verdict means the event is a dropped or
/// irrelevant leg and should be discarded by the caller.
pub fn classify(
    origin_channel: &str,
    dest_channel: &str,
    source_number: &str,
    dialed_destination: &str,
    caller_id: &str,
) -> Classification {
    let origin = inner_token(origin_channel);
    let dest = inner_token(dest_channel);

    match (origin, dest) {
        (Some(_), Some(dest_token)) => {
            if source_number.is_empty() && caller_id.is_empty() {
                Classification::new(dest_token, HIDDEN_NUMBER, CallVerdict::HiddenIncoming)
            } else if source_number.len() > 4 {
                Classification::new(dest_token, source_number, CallVerdict::Incoming)
            } else {
                // Both sides are extensions: intra-office call, nothing to report
                Classification::new("", "", CallVerdict::Inner)
            }
        }
        (Some(origin_token), None) => {
            if dialed_destination.len() >= 4 {
                Classification::new(origin_token, dialed_destination, CallVerdict::Outgoing)
            } else {
                Classification::unknown()
            }
        }
        (None, Some(dest_token)) => {
            if source_number.is_empty() && caller_id.is_empty() {
                Classification::new(dest_token, HIDDEN_NUMBER, CallVerdict::HiddenIncoming)
            } else {
                Classification::new(dest_token, source_number, CallVerdict::Incoming)
            }
        }
        // High chance this is just a dropped call leg
        (None, None) => Classification::unknown(),
    }
}
