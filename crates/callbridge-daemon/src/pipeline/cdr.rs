//! Call-detail record delivery
//!
//! Serializes a finished call into the backend wire shape and POSTs it to
//! the owning tenant through the signed transport.

use crate::config::TenantSettings;
use crate::pipeline::{Deliverer, DrainRecord};
use crate::transport::{HttpMethod, SignedTransport};
use async_trait::async_trait;
use callbridge_common::{BridgeError, CdrRecord, RecordKind, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Backend operation accepting one finished call
const SAVE_CALL_OP: &str = "save_phone_call";

impl DrainRecord for CdrRecord {
    const KIND: RecordKind = RecordKind::Cdr;

    fn display_id(&self) -> &str {
        &self.unique_id
    }
}

/// Wire shape the agency backends expect for one call
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireCdr<'a> {
    unique_id: &'a str,
    inner_number: &'a str,
    opponent_number: &'a str,
    direction: &'a str,
    started_at: DateTime<Utc>,
    duration: u32,
    disposition: &'a str,
}

impl<'a> From<&'a CdrRecord> for WireCdr<'a> {
    fn from(record: &'a CdrRecord) -> Self {
        Self {
            unique_id: &record.unique_id,
            inner_number: &record.inner_number,
            opponent_number: &record.opponent_number,
            direction: record.direction.as_str(),
            started_at: record.started_at,
            duration: record.duration_secs,
            disposition: &record.disposition,
        }
    }
}

/// [`Deliverer`] POSTing call-detail records to their tenant backend
pub struct CdrDeliverer {
    transport: SignedTransport,
    tenants: BTreeMap<String, TenantSettings>,
}

impl CdrDeliverer {
    pub fn new(transport: SignedTransport, tenants: BTreeMap<String, TenantSettings>) -> Self {
        Self { transport, tenants }
    }
}

#[async_trait]
impl Deliverer<CdrRecord> for CdrDeliverer {
    async fn deliver(&self, record: &CdrRecord) -> Result<()> {
        let settings = self.tenants.get(&record.tenant).ok_or_else(|| {
            BridgeError::Config(format!("unknown tenant {} on record", record.tenant))
        })?;

        self.transport
            .send_signed(
                &WireCdr::from(record),
                &settings.endpoint(SAVE_CALL_OP),
                HttpMethod::Post,
                &settings.secret,
                &settings.company_id,
            )
            .await?;
        Ok(())
    }
}
