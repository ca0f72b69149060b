//! Queue-availability reconciliation
//!
//! Every cycle asks the switch which inner numbers currently sit in which
//! call-routing queues, cross-references that against the registry, and
//! publishes one availability map per tenant. A number counts as available
//! when it is active in its home queue or in the region-wide variant of it
//! (the home queue name minus its last character).

use crate::config::TenantSettings;
use crate::registry::InnerNumberRegistry;
use crate::switch::SwitchClient;
use crate::transport::{HttpMethod, SignedTransport};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Backend operation accepting one tenant's availability map
const SAVE_QUEUE_STATES_OP: &str = "save_company_queues_states";

/// Queue-member names look like `Local/1023ua@agents/n`: four digits of
/// number starting at offset 6, then a two-character tenant tag.
const NAME_NUMBER_RANGE: std::ops::Range<usize> = 6..10;
const NAME_TAG_RANGE: std::ops::Range<usize> = 10..12;

/// Published availability of one inner number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    NotAvailable,
}

/// tenant -> inner number -> queues the number is currently active in
type ActiveQueues = HashMap<String, HashMap<String, Vec<String>>>;

/// Periodic queue-membership reconciler
pub struct QueueReconciler {
    registry: Arc<InnerNumberRegistry>,
    switch: Arc<dyn SwitchClient>,
    transport: SignedTransport,
    tenants: BTreeMap<String, TenantSettings>,
}

impl QueueReconciler {
    pub fn new(
        registry: Arc<InnerNumberRegistry>,
        switch: Arc<dyn SwitchClient>,
        transport: SignedTransport,
        tenants: BTreeMap<String, TenantSettings>,
    ) -> Self {
        Self {
            registry,
            switch,
            transport,
            tenants,
        }
    }

    /// Run one reconciliation cycle.
    ///
    /// A failed switch request aborts the whole cycle and nothing is
    /// published; a failed per-tenant publish leaves the other tenants
    /// unaffected.
    pub async fn run_cycle(&self) {
        if let Err(err) = self.switch.request_queue_status().await {
            error!("Queue status request failed, skipping cycle: {}", err);
            return;
        }
        let active = self.collect_active_queues().await;

        // Every tenant gets a publish each cycle, even with an empty map
        for (tenant, settings) in &self.tenants {
            let statuses = self.tenant_statuses(tenant, &active).await;
            if let Err(err) = self
                .transport
                .send_signed(
                    &statuses,
                    &settings.endpoint(SAVE_QUEUE_STATES_OP),
                    HttpMethod::Post,
                    &settings.secret,
                    &settings.company_id,
                )
                .await
            {
                error!("Cannot publish queue states for {}: {}", tenant, err);
            } else {
                info!("<<< QUEUE STATES SENT | {} | {}", tenant, statuses.len());
            }
        }
    }

    /// Group the switch's queue-member batch by tenant and number.
    ///
    /// Entries whose name is too short or whose tag is not a configured
    /// tenant belong to static queues and are dropped.
    async fn collect_active_queues(&self) -> ActiveQueues {
        let mut active = ActiveQueues::new();
        for event in self.switch.queue_events().await {
            let Some(number) = event.name.get(NAME_NUMBER_RANGE) else {
                continue;
            };
            let Some(tag) = event.name.get(NAME_TAG_RANGE) else {
                continue;
            };
            if !self.tenants.contains_key(tag) {
                continue;
            }
            active
                .entry(tag.to_string())
                .or_default()
                .entry(number.to_string())
                .or_default()
                .push(event.queue);
        }
        active
    }

    async fn tenant_statuses(
        &self,
        tenant: &str,
        active: &ActiveQueues,
    ) -> BTreeMap<String, Availability> {
        let empty = HashMap::new();
        let tenant_active = active.get(tenant).unwrap_or(&empty);

        let mut statuses = BTreeMap::new();
        for number in self.registry.tenant_numbers(tenant).await {
            let home = match self.switch.home_queue(&number).await {
                Ok(home) => home,
                Err(err) => {
                    // Stale or retired number, no status this cycle
                    debug!("No home queue for {} ({}), skipping: {}", number, tenant, err);
                    continue;
                }
            };
            // Region-wide variant of the same queue: the name minus its
            // final character, truncated on a char boundary
            let generalized = match home.char_indices().last() {
                Some((idx, _)) => &home[..idx],
                None => "",
            };

            let status = match tenant_active.get(&number) {
                None => Availability::NotAvailable,
                Some(queues) => {
                    let matched = queues
                        .iter()
                        .any(|queue| queue == &home || queue == generalized);
                    for queue in queues {
                        if queue != &home && queue != generalized {
                            // Reserved hook: noted, no corrective action taken
                            warn!(
                                "Number {} ({}) active in foreign queue {}",
                                number, tenant, queue
                            );
                        }
                    }
                    if matched {
                        Availability::Available
                    } else {
                        Availability::NotAvailable
                    }
                }
            };
            statuses.insert(number, status);
        }
        statuses
    }

    /// Spawn the periodic reconciliation task.
    pub fn start(self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Initiating queue reconciler...");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Finishing queue reconciler...");
                        return;
                    }
                    _ = ticker.tick() => self.run_cycle().await,
                }
            }
        })
    }
}
