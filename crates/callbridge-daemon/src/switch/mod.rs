//! Switch collaborator
//!
//! The reconciler talks to the telephony switch through this contract: a
//! fire-and-forget queue-status request, the finite event batch it yields,
//! and the per-number home-queue lookup. The production implementation
//! speaks the switch's manager protocol over TCP, covering exactly these
//! three shapes and nothing more of the protocol.

mod ami;

pub use ami::AmiClient;

use async_trait::async_trait;
use callbridge_common::Result;

/// One queue-membership entry reported by the switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMemberEvent {
    /// Queue the member currently sits in
    pub queue: String,
    /// Agent-style name encoding a number and its tenant tag
    pub name: String,
}

/// Queue-related operations the reconciler needs from the switch
#[async_trait]
pub trait SwitchClient: Send + Sync + 'static {
    /// Ask the switch to report current queue membership. The resulting
    /// batch becomes available through [`SwitchClient::queue_events`].
    async fn request_queue_status(&self) -> Result<()>;

    /// Drain the batch collected by the last status request.
    async fn queue_events(&self) -> Vec<QueueMemberEvent>;

    /// The single home queue statically assigned to `number`.
    async fn home_queue(&self, number: &str) -> Result<String>;
}
