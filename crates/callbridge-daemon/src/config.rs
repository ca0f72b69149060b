//! Configuration management

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Daemon Configuration Constants
// ============================================================================

/// Default path of the buffered-record store.
pub const DEFAULT_STORE_PATH: &str = "./callbridge.db";

/// Default tick interval of the call-detail reader in seconds.
pub const DEFAULT_CDR_TICK_SECS: u64 = 5;

/// Default maximum call-detail batch per tick.
pub const DEFAULT_CDR_BATCH_MAX: u32 = 50;

/// Default number of call-detail sender workers.
pub const DEFAULT_CDR_SENDERS: usize = 4;

/// Default tick interval of the recording reader in seconds.
pub const DEFAULT_RECORDING_TICK_SECS: u64 = 30;

/// Default maximum recording batch per tick.
pub const DEFAULT_RECORDING_BATCH_MAX: u32 = 10;

/// Default number of recording sender workers.
pub const DEFAULT_RECORDING_SENDERS: usize = 2;

/// Default period of the inner-number refresh in seconds (10 minutes).
pub const DEFAULT_REGISTRY_REFRESH_SECS: u64 = 600;

/// Default attempt budget for one tenant's number fetch.
pub const DEFAULT_REGISTRY_RETRY_ATTEMPTS: u32 = 10;

/// Default delay between number-fetch attempts in seconds.
pub const DEFAULT_REGISTRY_RETRY_DELAY_SECS: u64 = 5;

/// Default period of the queue reconciler in seconds.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

/// Default timeout of one signed request in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default switch manager host.
pub const DEFAULT_AMI_HOST: &str = "127.0.0.1";

/// Default switch manager port.
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Default timeout for one switch response in seconds.
pub const DEFAULT_AMI_READ_TIMEOUT_SECS: u64 = 10;

/// Default switch database family holding per-number home queues.
pub const DEFAULT_HOME_QUEUE_FAMILY: &str = "queues";

/// Default directory holding raw call recordings.
pub const DEFAULT_CALLS_DIR: &str = "/var/spool/asterisk/monitor";

/// Default object-storage region.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub cdr: DrainConfig,
    pub recording: DrainConfig,
    pub registry: RegistryConfig,
    pub reconcile: ReconcileConfig,
    pub ami: AmiConfig,
    pub media: MediaConfig,
    pub transport: TransportConfig,
    pub alert_webhook: Option<String>,
    pub tenants: BTreeMap<String, TenantSettings>,
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: String,
}

/// One reader/sender drain pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    pub tick_secs: u64,
    pub batch_max: u32,
    pub senders: usize,
}

impl DrainConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

/// Inner-number registry refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub refresh_interval_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
}

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.retry_delay_secs),
        )
    }
}

/// Queue reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Switch manager-interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub read_timeout_secs: u64,
    /// Switch database family holding each number's home queue
    pub home_queue_family: String,
}

impl AmiConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Recording handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub calls_dir: PathBuf,
    pub storage: StorageConfig,
}

/// Object storage (S3-compatible) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub force_path_style: bool,
}

/// Signed transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub request_timeout_secs: u64,
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-tenant agency backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    pub api_url: String,
    pub secret: String,
    pub company_id: String,
}

impl TenantSettings {
    /// Full URL of one backend operation
    pub fn endpoint(&self, operation: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), operation)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            store: StoreConfig {
                path: env_string("BRIDGE_STORE_PATH", DEFAULT_STORE_PATH),
            },
            cdr: DrainConfig {
                tick_secs: env_parse("BRIDGE_CDR_TICK_SECS", DEFAULT_CDR_TICK_SECS),
                batch_max: env_parse("BRIDGE_CDR_BATCH_MAX", DEFAULT_CDR_BATCH_MAX),
                senders: env_parse("BRIDGE_CDR_SENDERS", DEFAULT_CDR_SENDERS),
            },
            recording: DrainConfig {
                tick_secs: env_parse("BRIDGE_RECORDING_TICK_SECS", DEFAULT_RECORDING_TICK_SECS),
                batch_max: env_parse("BRIDGE_RECORDING_BATCH_MAX", DEFAULT_RECORDING_BATCH_MAX),
                senders: env_parse("BRIDGE_RECORDING_SENDERS", DEFAULT_RECORDING_SENDERS),
            },
            registry: RegistryConfig {
                refresh_interval_secs: env_parse(
                    "BRIDGE_REGISTRY_REFRESH_SECS",
                    DEFAULT_REGISTRY_REFRESH_SECS,
                ),
                retry_attempts: env_parse(
                    "BRIDGE_REGISTRY_RETRY_ATTEMPTS",
                    DEFAULT_REGISTRY_RETRY_ATTEMPTS,
                ),
                retry_delay_secs: env_parse(
                    "BRIDGE_REGISTRY_RETRY_DELAY_SECS",
                    DEFAULT_REGISTRY_RETRY_DELAY_SECS,
                ),
            },
            reconcile: ReconcileConfig {
                interval_secs: env_parse(
                    "BRIDGE_RECONCILE_INTERVAL_SECS",
                    DEFAULT_RECONCILE_INTERVAL_SECS,
                ),
            },
            ami: AmiConfig {
                host: env_string("AMI_HOST", DEFAULT_AMI_HOST),
                port: env_parse("AMI_PORT", DEFAULT_AMI_PORT),
                username: env_string("AMI_USERNAME", ""),
                secret: env_string("AMI_SECRET", ""),
                read_timeout_secs: env_parse("AMI_READ_TIMEOUT_SECS", DEFAULT_AMI_READ_TIMEOUT_SECS),
                home_queue_family: env_string("AMI_HOME_QUEUE_FAMILY", DEFAULT_HOME_QUEUE_FAMILY),
            },
            media: MediaConfig {
                calls_dir: PathBuf::from(env_string("CALLS_DIR", DEFAULT_CALLS_DIR)),
                storage: StorageConfig {
                    endpoint: std::env::var("S3_ENDPOINT").ok(),
                    region: env_string("S3_REGION", DEFAULT_S3_REGION),
                    bucket: env_string("S3_BUCKET", ""),
                    access_key: env_string("S3_ACCESS_KEY", ""),
                    secret_key: env_string("S3_SECRET_KEY", ""),
                    force_path_style: env_parse("S3_FORCE_PATH_STYLE", false),
                },
            },
            transport: TransportConfig {
                request_timeout_secs: env_parse(
                    "BRIDGE_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                ),
            },
            alert_webhook: std::env::var("BRIDGE_ALERT_WEBHOOK").ok(),
            tenants: load_tenants()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.path.is_empty() {
            anyhow::bail!("Store path cannot be empty");
        }

        for (name, drain) in [("cdr", &self.cdr), ("recording", &self.recording)] {
            if drain.batch_max == 0 {
                anyhow::bail!("{} batch_max must be greater than 0", name);
            }
            if drain.senders == 0 {
                anyhow::bail!("{} senders must be greater than 0", name);
            }
            if drain.tick_secs == 0 {
                anyhow::bail!("{} tick_secs must be greater than 0", name);
            }
        }

        if self.registry.retry_attempts == 0 {
            anyhow::bail!("Registry retry_attempts must be greater than 0");
        }

        if self.transport.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        if self.ami.port == 0 {
            anyhow::bail!("AMI port must be greater than 0");
        }

        for (code, tenant) in &self.tenants {
            if tenant.api_url.is_empty() {
                anyhow::bail!("Tenant {} has an empty api_url", code);
            }
            if tenant.secret.is_empty() {
                anyhow::bail!("Tenant {} has an empty secret", code);
            }
        }

        if self.tenants.is_empty() {
            tracing::warn!("No tenants configured - nothing will be delivered");
        }
        if self.ami.username.is_empty() {
            tracing::warn!("AMI username not configured - queue reconciliation will fail");
        }
        if self.media.storage.bucket.is_empty() {
            tracing::warn!("S3 bucket not configured - recording uploads will fail");
        }

        Ok(())
    }
}

fn load_tenants() -> anyhow::Result<BTreeMap<String, TenantSettings>> {
    let Ok(list) = std::env::var("BRIDGE_TENANTS") else {
        return Ok(BTreeMap::new());
    };

    let mut tenants = BTreeMap::new();
    for code in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let upper = code.to_uppercase();
        let var = |suffix: &str| -> anyhow::Result<String> {
            let name = format!("BRIDGE_TENANT_{}_{}", upper, suffix);
            std::env::var(&name).map_err(|_| anyhow::anyhow!("Missing {} for tenant {}", name, code))
        };
        tenants.insert(
            code.to_lowercase(),
            TenantSettings {
                api_url: var("API_URL")?,
                secret: var("SECRET")?,
                company_id: var("COMPANY_ID")?,
            },
        );
    }
    Ok(tenants)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                path: DEFAULT_STORE_PATH.to_string(),
            },
            cdr: DrainConfig {
                tick_secs: DEFAULT_CDR_TICK_SECS,
                batch_max: DEFAULT_CDR_BATCH_MAX,
                senders: DEFAULT_CDR_SENDERS,
            },
            recording: DrainConfig {
                tick_secs: DEFAULT_RECORDING_TICK_SECS,
                batch_max: DEFAULT_RECORDING_BATCH_MAX,
                senders: DEFAULT_RECORDING_SENDERS,
            },
            registry: RegistryConfig {
                refresh_interval_secs: DEFAULT_REGISTRY_REFRESH_SECS,
                retry_attempts: DEFAULT_REGISTRY_RETRY_ATTEMPTS,
                retry_delay_secs: DEFAULT_REGISTRY_RETRY_DELAY_SECS,
            },
            reconcile: ReconcileConfig {
                interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            },
            ami: AmiConfig {
                host: DEFAULT_AMI_HOST.to_string(),
                port: DEFAULT_AMI_PORT,
                username: String::new(),
                secret: String::new(),
                read_timeout_secs: DEFAULT_AMI_READ_TIMEOUT_SECS,
                home_queue_family: DEFAULT_HOME_QUEUE_FAMILY.to_string(),
            },
            media: MediaConfig {
                calls_dir: PathBuf::from(DEFAULT_CALLS_DIR),
                storage: StorageConfig {
                    endpoint: None,
                    region: DEFAULT_S3_REGION.to_string(),
                    bucket: String::new(),
                    access_key: String::new(),
                    secret_key: String::new(),
                    force_path_style: false,
                },
            },
            transport: TransportConfig {
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            alert_webhook: None,
            tenants: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_tenant_env() {
        for name in [
            "BRIDGE_TENANTS",
            "BRIDGE_TENANT_UA_API_URL",
            "BRIDGE_TENANT_UA_SECRET",
            "BRIDGE_TENANT_UA_COMPANY_ID",
            "BRIDGE_TENANT_RU_API_URL",
            "BRIDGE_TENANT_RU_SECRET",
            "BRIDGE_TENANT_RU_COMPANY_ID",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cdr.batch_max, DEFAULT_CDR_BATCH_MAX);
        assert_eq!(config.cdr.senders, DEFAULT_CDR_SENDERS);
        assert_eq!(config.recording.tick_secs, DEFAULT_RECORDING_TICK_SECS);
        assert_eq!(config.registry.retry_attempts, DEFAULT_REGISTRY_RETRY_ATTEMPTS);
        assert_eq!(config.ami.port, DEFAULT_AMI_PORT);
        assert!(config.tenants.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_from_registry_config() {
        let registry = RegistryConfig {
            refresh_interval_secs: 600,
            retry_attempts: 10,
            retry_delay_secs: 5,
        };
        let policy = registry.retry_policy();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.cdr.batch_max = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_senders() {
        let mut config = Config::default();
        config.recording.senders = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_joins_operation() {
        let tenant = TenantSettings {
            api_url: "https://backend.example/api/".to_string(),
            secret: "s".to_string(),
            company_id: "1".to_string(),
        };
        assert_eq!(
            tenant.endpoint("save_phone_call"),
            "https://backend.example/api/save_phone_call"
        );
    }

    #[test]
    #[serial]
    fn test_load_tenant_table_from_env() {
        clear_tenant_env();
        std::env::set_var("BRIDGE_TENANTS", "ua, ru");
        std::env::set_var("BRIDGE_TENANT_UA_API_URL", "https://ua.example/api");
        std::env::set_var("BRIDGE_TENANT_UA_SECRET", "ua-secret");
        std::env::set_var("BRIDGE_TENANT_UA_COMPANY_ID", "12");
        std::env::set_var("BRIDGE_TENANT_RU_API_URL", "https://ru.example/api");
        std::env::set_var("BRIDGE_TENANT_RU_SECRET", "ru-secret");
        std::env::set_var("BRIDGE_TENANT_RU_COMPANY_ID", "77");

        let tenants = load_tenants().unwrap();
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants["ua"].company_id, "12");
        assert_eq!(tenants["ru"].secret, "ru-secret");

        clear_tenant_env();
    }

    #[test]
    #[serial]
    fn test_load_tenants_requires_all_settings() {
        clear_tenant_env();
        std::env::set_var("BRIDGE_TENANTS", "ua");
        std::env::set_var("BRIDGE_TENANT_UA_API_URL", "https://ua.example/api");
        // secret and company id missing

        assert!(load_tenants().is_err());

        clear_tenant_env();
    }
}
