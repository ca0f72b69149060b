//! Inner-number registry
//!
//! Holds every tenant's current set of inner (extension) numbers, refreshed
//! periodically from the tenant backends, plus the global set of numbers
//! seen under more than one tenant. Fetches run concurrently and outside
//! any lock; only the in-memory merge takes the write lock, so resolution
//! readers are never blocked on network latency.

use crate::alert::Alerter;
use crate::config::TenantSettings;
use crate::retry::RetryPolicy;
use crate::transport::{HttpMethod, SignedTransport};
use callbridge_common::Result;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Backend operation serving a tenant's comma-joined inner-number list
const FETCH_NUMBERS_OP: &str = "get_employees_inner_phone";

/// Plausible length range of an inner number
const INNER_NUMBER_LEN: RangeInclusive<usize> = 2..=6;

/// Minimum opponent-number length for an acceptable pair
const OPPONENT_MIN_LEN: usize = 7;

/// Stricter opponent minimum for the tenant below
const OPPONENT_MIN_LEN_STRICT: usize = 9;
const STRICT_OPPONENT_TENANT: &str = "ua";

struct DialPrefix {
    digits: &'static str,
    local_len: Option<usize>,
    tenant: &'static str,
}

/// Country dial-prefix table used to resolve a duplicated number's tenant
/// from the opponent number. First matching rule wins. The leading digit is
/// tested by membership in the rule's digit string, so any number starting
/// with 3, 8 or 0 lands on the first rule.
const DIAL_PREFIXES: &[DialPrefix] = &[
    DialPrefix {
        digits: "380",
        local_len: Some(10),
        tenant: "ua",
    },
    DialPrefix {
        digits: "77",
        local_len: None,
        tenant: "ru",
    },
];

fn tenant_by_dial_prefix(opponent_number: &str) -> Option<&'static str> {
    let first = opponent_number.chars().next()?;
    DIAL_PREFIXES
        .iter()
        .find(|rule| {
            rule.digits.contains(first)
                || rule.local_len.is_some_and(|len| opponent_number.len() == len)
        })
        .map(|rule| rule.tenant)
}

#[derive(Default)]
struct RegistryState {
    /// tenant code -> current inner-number set
    numbers: HashMap<String, HashSet<String>>,
    /// numbers seen under more than one tenant; grows monotonically
    duplicates: HashSet<String>,
}

/// Concurrent per-tenant inner-number registry
pub struct InnerNumberRegistry {
    tenants: BTreeMap<String, TenantSettings>,
    transport: SignedTransport,
    alerts: Alerter,
    retry: RetryPolicy,
    state: RwLock<RegistryState>,
}

impl InnerNumberRegistry {
    pub fn new(
        tenants: BTreeMap<String, TenantSettings>,
        transport: SignedTransport,
        alerts: Alerter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tenants,
            transport,
            alerts,
            retry,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Refresh every tenant's number set from its backend.
    ///
    /// All fetches run in parallel; each retries per the registry's policy
    /// and, on exhaustion, is abandoned for this cycle without affecting
    /// the other tenants. Returns once every tenant has merged or given up.
    pub async fn refresh_all(&self) {
        let fetches = self.tenants.iter().map(|(code, settings)| async move {
            (code.as_str(), self.fetch_numbers(code, settings).await)
        });

        for (tenant, outcome) in join_all(fetches).await {
            match outcome {
                Ok(joined) => self.merge(tenant, &joined).await,
                Err(err) => {
                    error!("Cannot refresh inner numbers for {}: {}", tenant, err);
                    self.alerts
                        .notify(&format!("Cannot load inner numbers for {} | {}", tenant, err))
                        .await;
                }
            }
        }
    }

    async fn fetch_numbers(&self, tenant: &str, settings: &TenantSettings) -> Result<String> {
        let url = settings.endpoint(FETCH_NUMBERS_OP);
        let payload = serde_json::json!({ "CompanyId": settings.company_id });
        self.retry
            .run(&format!("inner numbers fetch for {}", tenant), || {
                self.transport.send_signed(
                    &payload,
                    &url,
                    HttpMethod::Get,
                    &settings.secret,
                    &settings.company_id,
                )
            })
            .await
    }

    /// Merge one tenant's freshly fetched comma-joined number list.
    ///
    /// Numbers already stored under a different tenant join the duplicate
    /// set; the tenant's own set is then wholly replaced by the fetch, so
    /// numbers absent from it are dropped. Empty tokens are skipped.
    pub async fn merge(&self, tenant: &str, joined_numbers: &str) {
        let mut state = self.state.write().await;

        let mut fresh = HashSet::new();
        for number in joined_numbers.split(',').filter(|n| !n.is_empty()) {
            let duplicated = state
                .numbers
                .iter()
                .any(|(other, numbers)| other != tenant && numbers.contains(number));
            if duplicated {
                state.duplicates.insert(number.to_string());
            }
            fresh.insert(number.to_string());
        }

        debug!(
            "Merged {} inner numbers for {} ({} duplicates known)",
            fresh.len(),
            tenant,
            state.duplicates.len()
        );
        state.numbers.insert(tenant.to_string(), fresh);
    }

    /// Tenant owning `inner_number`.
    ///
    /// A duplicated number cannot be resolved by set lookup, so its tenant
    /// is guessed from the opponent number's dialing shape instead.
    pub async fn resolve_tenant(&self, inner_number: &str, opponent_number: &str) -> Option<String> {
        let state = self.state.read().await;

        if state.duplicates.contains(inner_number) {
            return tenant_by_dial_prefix(opponent_number).map(str::to_string);
        }

        state
            .numbers
            .iter()
            .find(|(_, numbers)| numbers.contains(inner_number))
            .map(|(tenant, _)| tenant.clone())
    }

    /// Whether a classified number pair is worth reporting for this tenant.
    pub fn is_valid_pair(&self, inner_number: &str, opponent_number: &str, tenant: &str) -> bool {
        let min_opponent = if tenant == STRICT_OPPONENT_TENANT {
            OPPONENT_MIN_LEN_STRICT
        } else {
            OPPONENT_MIN_LEN
        };
        INNER_NUMBER_LEN.contains(&inner_number.len()) && opponent_number.len() >= min_opponent
    }

    /// Snapshot of one tenant's current numbers
    pub async fn tenant_numbers(&self, tenant: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .numbers
            .get(tenant)
            .map(|numbers| numbers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Configured tenant codes, in stable order
    pub fn tenant_codes(&self) -> Vec<String> {
        self.tenants.keys().cloned().collect()
    }

    /// Spawn the periodic refresh task. The first refresh runs immediately.
    pub fn start(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Initiating number registry refresher...");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Finishing number registry refresher...");
                        return;
                    }
                    _ = ticker.tick() => self.refresh_all().await,
                }
            }
        })
    }
}
