// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Streamgate";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "streamgate";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".streamgate";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "streamgate.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "STREAMGATE_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "STREAMGATE_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "STREAMGATE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "STREAMGATE_LOG";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 3000;

/// Default maximum request body size (1 MiB)
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

// =============================================================================
// Environment Variables - Broker
// =============================================================================

/// Broker backend (memory or redis)
pub const ENV_BROKER: &str = "STREAMGATE_BROKER";

/// Broker connection URL (redis backend)
pub const ENV_BROKER_URL: &str = "STREAMGATE_BROKER_URL";

// =============================================================================
// Environment Variables - Provisioned Resources
// =============================================================================

pub const ENV_MAX_MSGS: &str = "STREAMGATE_MAX_MSGS";
pub const ENV_MAX_BYTES: &str = "STREAMGATE_MAX_BYTES";
pub const ENV_STORAGE: &str = "STREAMGATE_STORAGE";
pub const ENV_DELIVER_POLICY: &str = "STREAMGATE_DELIVER_POLICY";

// =============================================================================
// Environment Variables - Bridges
// =============================================================================

/// Default fetch wait in milliseconds
pub const ENV_FETCH_WAIT_MS: &str = "STREAMGATE_FETCH_WAIT_MS";

/// Payload encoding (raw or text)
pub const ENV_ENCODING: &str = "STREAMGATE_ENCODING";

// =============================================================================
// Storage Defaults
// =============================================================================

/// Storage unit provisioned at startup
pub const DEFAULT_UNIT_NAME: &str = "unified_stream";

/// Subjects of the startup storage unit
pub const DEFAULT_UNIT_SUBJECTS: &[&str] = &["*"];

/// Default replica count for provisioned storage units
pub const DEFAULT_REPLICAS: u8 = 1;

// =============================================================================
// Cursor Defaults
// =============================================================================

/// Seconds before an unacknowledged message is redelivered
pub const DEFAULT_ACK_WAIT_SECS: u64 = 30;

// =============================================================================
// Fetch Defaults
// =============================================================================

/// Pull expiry when the request does not set `wait_ms`
pub const DEFAULT_FETCH_WAIT_MS: u64 = 1000;

/// Upper bound for a requested `wait_ms`
pub const DEFAULT_FETCH_MAX_WAIT_MS: u64 = 30_000;

// =============================================================================
// Provisioning Memory
// =============================================================================

/// How long a resource is remembered as existing (5 minutes)
pub const DEFAULT_PROVISIONING_TTL_SECS: u64 = 300;

/// Maximum number of remembered resources
pub const DEFAULT_PROVISIONING_CAPACITY: u64 = 10_000;

// =============================================================================
// Shutdown
// =============================================================================

/// Upper bound for closing the broker on shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
