use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::broker::{
    CursorSpec, DeliverPolicy, DiscardPolicy, StorageMedium, StorageUnitSpec,
};
use crate::domain::{CursorTemplate, PayloadEncoding, StorageUnitTemplate};
use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_ACK_WAIT_SECS, DEFAULT_BODY_LIMIT_BYTES,
    DEFAULT_FETCH_MAX_WAIT_MS, DEFAULT_FETCH_WAIT_MS, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_PROVISIONING_CAPACITY, DEFAULT_PROVISIONING_TTL_SECS, DEFAULT_REPLICAS,
    DEFAULT_UNIT_NAME, DEFAULT_UNIT_SUBJECTS,
};

// =============================================================================
// Broker Backend Enum
// =============================================================================

/// Broker backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process broker, lost on restart
    #[default]
    Memory,
    /// Redis Streams
    Redis,
}

impl fmt::Display for BrokerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerBackend::Memory => write!(f, "memory"),
            BrokerBackend::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config Structs (all Option for merging)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub body_limit_bytes: Option<usize>,
}

/// Broker configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BrokerFileConfig {
    pub backend: Option<BrokerBackend>,
    pub url: Option<String>,
}

/// Storage unit created at startup (nested under storage)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DefaultUnitFileConfig {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub subjects: Option<Vec<String>>,
}

/// Retention settings for provisioned storage units
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StorageFileConfig {
    pub max_msgs: Option<u64>,
    pub max_bytes: Option<u64>,
    pub medium: Option<StorageMedium>,
    pub discard: Option<DiscardPolicy>,
    pub replicas: Option<u8>,
    pub default_unit: Option<DefaultUnitFileConfig>,
}

/// Delivery settings for provisioned cursors
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CursorFileConfig {
    pub deliver_policy: Option<DeliverPolicy>,
    pub ack_wait_secs: Option<u64>,
    pub max_deliver: Option<u32>,
}

/// Fetch configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FetchFileConfig {
    pub wait_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
}

/// Payload configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PayloadFileConfig {
    pub encoding: Option<PayloadEncoding>,
}

/// Provisioning memory section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProvisioningFileConfig {
    pub memory_ttl_secs: Option<u64>,
    pub memory_capacity: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub broker: Option<BrokerFileConfig>,
    pub storage: Option<StorageFileConfig>,
    pub cursor: Option<CursorFileConfig>,
    pub fetch: Option<FetchFileConfig>,
    pub payload: Option<PayloadFileConfig>,
    pub provisioning: Option<ProvisioningFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Overwrite `current` with `value` when set, tracing the merged key
macro_rules! merge_field {
    ($current:ident, $other:ident, $field:ident, $key:literal) => {
        if $other.$field.is_some() {
            tracing::trace!(key = $key, value = ?$other.$field, "Merging config value");
            $current.$field = $other.$field;
        }
    };
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown top-level fields (likely typos)
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            tracing::warn!(
                fields = %keys.join(", "),
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            merge_field!(current, server, host, "server.host");
            merge_field!(current, server, port, "server.port");
            merge_field!(current, server, body_limit_bytes, "server.body_limit_bytes");
        }

        if let Some(broker) = other.broker {
            let current = self.broker.get_or_insert_with(BrokerFileConfig::default);
            merge_field!(current, broker, backend, "broker.backend");
            merge_field!(current, broker, url, "broker.url");
        }

        if let Some(storage) = other.storage {
            let current = self.storage.get_or_insert_with(StorageFileConfig::default);
            merge_field!(current, storage, max_msgs, "storage.max_msgs");
            merge_field!(current, storage, max_bytes, "storage.max_bytes");
            merge_field!(current, storage, medium, "storage.medium");
            merge_field!(current, storage, discard, "storage.discard");
            merge_field!(current, storage, replicas, "storage.replicas");

            if let Some(unit) = storage.default_unit {
                let current_unit = current
                    .default_unit
                    .get_or_insert_with(DefaultUnitFileConfig::default);
                merge_field!(current_unit, unit, enabled, "storage.default_unit.enabled");
                merge_field!(current_unit, unit, name, "storage.default_unit.name");
                merge_field!(current_unit, unit, subjects, "storage.default_unit.subjects");
            }
        }

        if let Some(cursor) = other.cursor {
            let current = self.cursor.get_or_insert_with(CursorFileConfig::default);
            merge_field!(current, cursor, deliver_policy, "cursor.deliver_policy");
            merge_field!(current, cursor, ack_wait_secs, "cursor.ack_wait_secs");
            merge_field!(current, cursor, max_deliver, "cursor.max_deliver");
        }

        if let Some(fetch) = other.fetch {
            let current = self.fetch.get_or_insert_with(FetchFileConfig::default);
            merge_field!(current, fetch, wait_ms, "fetch.wait_ms");
            merge_field!(current, fetch, max_wait_ms, "fetch.max_wait_ms");
        }

        if let Some(payload) = other.payload {
            let current = self.payload.get_or_insert_with(PayloadFileConfig::default);
            merge_field!(current, payload, encoding, "payload.encoding");
        }

        if let Some(provisioning) = other.provisioning {
            let current = self
                .provisioning
                .get_or_insert_with(ProvisioningFileConfig::default);
            merge_field!(
                current,
                provisioning,
                memory_ttl_secs,
                "provisioning.memory_ttl_secs"
            );
            merge_field!(
                current,
                provisioning,
                memory_capacity,
                "provisioning.memory_capacity"
            );
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

/// Broker connection configuration
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    /// Connection URL (redis backend)
    pub url: Option<String>,
}

/// Storage unit provisioned at startup
#[derive(Debug, Clone)]
pub struct DefaultUnitConfig {
    pub enabled: bool,
    pub name: String,
    pub subjects: Vec<String>,
}

/// Storage configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Retention applied to every provisioned storage unit
    pub template: StorageUnitTemplate,
    pub default_unit: DefaultUnitConfig,
}

impl StorageConfig {
    /// Spec of the startup storage unit
    pub fn default_unit_spec(&self) -> StorageUnitSpec {
        self.template
            .spec(&self.default_unit.name, self.default_unit.subjects.clone())
    }
}

/// Fetch configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub wait_ms: u64,
    pub max_wait_ms: u64,
}

impl FetchConfig {
    /// Pull expiry for a request, clamped to `[1, max_wait_ms]`
    pub fn wait(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.wait_ms)
            .clamp(1, self.max_wait_ms.max(1));
        Duration::from_millis(ms)
    }
}

/// Provisioning memory configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub memory_ttl: Duration,
    pub memory_capacity: u64,
}

/// Final application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub cursor: CursorTemplate,
    pub fetch: FetchConfig,
    pub encoding: PayloadEncoding,
    pub provisioning: ProvisioningConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.streamgate/streamgate.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Profile dir - skipped if missing
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. CLI-specified path OR local directory
        let overlay_path = match cli.config {
            Some(ref path) => {
                let expanded = expand_path(&path.to_string_lossy());
                if !expanded.exists() {
                    anyhow::bail!("Config file not found: {}", expanded.display());
                }
                Some(expanded)
            }
            None => Some(PathBuf::from(CONFIG_FILE_NAME)).filter(|local| local.exists()),
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        // 3. Layer: defaults -> file config -> CLI/env overrides
        let file_server = file_config.server.unwrap_or_default();
        let file_broker = file_config.broker.unwrap_or_default();
        let file_storage = file_config.storage.unwrap_or_default();
        let file_default_unit = file_storage.default_unit.clone().unwrap_or_default();
        let file_cursor = file_config.cursor.unwrap_or_default();
        let file_fetch = file_config.fetch.unwrap_or_default();
        let file_payload = file_config.payload.unwrap_or_default();
        let file_provisioning = file_config.provisioning.unwrap_or_default();

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT),
            body_limit_bytes: file_server
                .body_limit_bytes
                .unwrap_or(DEFAULT_BODY_LIMIT_BYTES),
        };

        let broker = BrokerConfig {
            backend: cli.broker.or(file_broker.backend).unwrap_or_default(),
            url: cli
                .broker_url
                .clone()
                .or(file_broker.url)
                .filter(|url| !url.is_empty()),
        };

        let storage = StorageConfig {
            template: StorageUnitTemplate {
                max_msgs: cli.max_msgs.or(file_storage.max_msgs),
                max_bytes: cli.max_bytes.or(file_storage.max_bytes),
                storage: cli.storage.or(file_storage.medium).unwrap_or_default(),
                discard: file_storage.discard.unwrap_or_default(),
                replicas: file_storage.replicas.unwrap_or(DEFAULT_REPLICAS),
            },
            default_unit: DefaultUnitConfig {
                enabled: file_default_unit.enabled.unwrap_or(true),
                name: file_default_unit
                    .name
                    .unwrap_or_else(|| DEFAULT_UNIT_NAME.to_string()),
                subjects: file_default_unit.subjects.unwrap_or_else(|| {
                    DEFAULT_UNIT_SUBJECTS.iter().map(|s| s.to_string()).collect()
                }),
            },
        };

        let cursor = CursorTemplate {
            deliver_policy: cli
                .deliver_policy
                .or(file_cursor.deliver_policy)
                .unwrap_or_default(),
            ack_wait: Duration::from_secs(
                file_cursor.ack_wait_secs.unwrap_or(DEFAULT_ACK_WAIT_SECS),
            ),
            max_deliver: file_cursor.max_deliver,
        };

        let fetch = FetchConfig {
            wait_ms: cli
                .fetch_wait_ms
                .or(file_fetch.wait_ms)
                .unwrap_or(DEFAULT_FETCH_WAIT_MS),
            max_wait_ms: file_fetch.max_wait_ms.unwrap_or(DEFAULT_FETCH_MAX_WAIT_MS),
        };

        let provisioning = ProvisioningConfig {
            memory_ttl: Duration::from_secs(
                file_provisioning
                    .memory_ttl_secs
                    .unwrap_or(DEFAULT_PROVISIONING_TTL_SECS),
            ),
            memory_capacity: file_provisioning
                .memory_capacity
                .unwrap_or(DEFAULT_PROVISIONING_CAPACITY),
        };

        let config = Self {
            server,
            broker,
            storage,
            cursor,
            fetch,
            encoding: cli.encoding.or(file_payload.encoding).unwrap_or_default(),
            provisioning,
        };

        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            broker = %config.broker.backend,
            max_msgs = ?config.storage.template.max_msgs,
            max_bytes = ?config.storage.template.max_bytes,
            storage = %config.storage.template.storage,
            discard = %config.storage.template.discard,
            default_unit = %config.storage.default_unit.name,
            deliver_policy = %config.cursor.deliver_policy,
            fetch_wait_ms = config.fetch.wait_ms,
            encoding = %config.encoding,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }

        // Port 0 would bind a random port
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.server.body_limit_bytes == 0 {
            anyhow::bail!("Configuration error: server.body_limit_bytes must be greater than 0");
        }

        if self.broker.backend == BrokerBackend::Redis && self.broker.url.is_none() {
            anyhow::bail!(
                "Configuration error: broker.url is required when broker.backend is 'redis'"
            );
        }

        if self.broker.backend == BrokerBackend::Redis && self.cursor.max_deliver.is_some() {
            anyhow::bail!(
                "Configuration error: cursor.max_deliver is not supported by the redis backend"
            );
        }

        if self.fetch.wait_ms == 0 {
            anyhow::bail!("Configuration error: fetch.wait_ms must be at least 1");
        }

        if self.fetch.wait_ms > self.fetch.max_wait_ms {
            anyhow::bail!(
                "Configuration error: fetch.wait_ms ({}) must not exceed fetch.max_wait_ms ({})",
                self.fetch.wait_ms,
                self.fetch.max_wait_ms
            );
        }

        if self.provisioning.memory_capacity == 0 {
            anyhow::bail!("Configuration error: provisioning.memory_capacity must be greater than 0");
        }

        // Template limits are checked through a probe spec; the default unit
        // doubles as that probe when enabled.
        let probe = if self.storage.default_unit.enabled {
            if self.storage.default_unit.name.is_empty() {
                anyhow::bail!("Configuration error: storage.default_unit.name must not be empty");
            }
            if self.storage.default_unit.subjects.is_empty() {
                anyhow::bail!(
                    "Configuration error: storage.default_unit.subjects must not be empty"
                );
            }
            self.storage.default_unit_spec()
        } else {
            self.storage
                .template
                .spec(DEFAULT_UNIT_NAME, vec![">".to_string()])
        };
        probe
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration error: storage: {}", e))?;

        CursorSpec {
            deliver_policy: self.cursor.deliver_policy,
            ack_wait: self.cursor.ack_wait,
            max_deliver: self.cursor.max_deliver,
            ..CursorSpec::new("probe")
        }
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: cursor: {}", e))?;

        Ok(())
    }
}

/// Get the profile config path (~/.streamgate/streamgate.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

/// Check if host binds to all network interfaces
pub fn is_all_interfaces(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}
