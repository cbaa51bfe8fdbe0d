use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::BrokerBackend;
use super::constants::{
    ENV_BROKER, ENV_BROKER_URL, ENV_CONFIG, ENV_DELIVER_POLICY, ENV_ENCODING, ENV_FETCH_WAIT_MS,
    ENV_HOST, ENV_MAX_BYTES, ENV_MAX_MSGS, ENV_PORT, ENV_STORAGE,
};
use crate::data::broker::{DeliverPolicy, StorageMedium};
use crate::domain::PayloadEncoding;

#[derive(Parser)]
#[command(name = "streamgate")]
#[command(version, about = "HTTP bridge for a durable pub/sub broker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Broker backend (memory or redis)
    #[arg(long, global = true, env = ENV_BROKER, value_parser = parse_broker_backend)]
    pub broker: Option<BrokerBackend>,

    /// Broker connection URL (redis://host:port/db)
    #[arg(long, global = true, env = ENV_BROKER_URL)]
    pub broker_url: Option<String>,

    /// Message limit for provisioned storage units
    #[arg(long, global = true, env = ENV_MAX_MSGS)]
    pub max_msgs: Option<u64>,

    /// Byte limit for provisioned storage units
    #[arg(long, global = true, env = ENV_MAX_BYTES)]
    pub max_bytes: Option<u64>,

    /// Storage medium for provisioned storage units (memory or file)
    #[arg(long, global = true, env = ENV_STORAGE, value_parser = parse_storage_medium)]
    pub storage: Option<StorageMedium>,

    /// Where new cursors start reading (all, last or new)
    #[arg(long, global = true, env = ENV_DELIVER_POLICY, value_parser = parse_deliver_policy)]
    pub deliver_policy: Option<DeliverPolicy>,

    /// Default fetch wait in milliseconds
    #[arg(long, global = true, env = ENV_FETCH_WAIT_MS)]
    pub fetch_wait_ms: Option<u64>,

    /// Payload encoding (raw or text)
    #[arg(long, global = true, env = ENV_ENCODING, value_parser = parse_payload_encoding)]
    pub encoding: Option<PayloadEncoding>,
}

/// Parse broker backend from CLI/env string
fn parse_broker_backend(s: &str) -> Result<BrokerBackend, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(BrokerBackend::Memory),
        "redis" => Ok(BrokerBackend::Redis),
        _ => Err(format!(
            "Invalid broker backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

/// Parse storage medium from CLI/env string
fn parse_storage_medium(s: &str) -> Result<StorageMedium, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StorageMedium::Memory),
        "file" => Ok(StorageMedium::File),
        _ => Err(format!(
            "Invalid storage medium '{}'. Valid options: memory, file",
            s
        )),
    }
}

/// Parse deliver policy from CLI/env string
fn parse_deliver_policy(s: &str) -> Result<DeliverPolicy, String> {
    match s.to_lowercase().as_str() {
        "all" => Ok(DeliverPolicy::All),
        "last" => Ok(DeliverPolicy::Last),
        "new" => Ok(DeliverPolicy::New),
        _ => Err(format!(
            "Invalid deliver policy '{}'. Valid options: all, last, new",
            s
        )),
    }
}

/// Parse payload encoding from CLI/env string
fn parse_payload_encoding(s: &str) -> Result<PayloadEncoding, String> {
    match s.to_lowercase().as_str() {
        "raw" => Ok(PayloadEncoding::Raw),
        "text" => Ok(PayloadEncoding::Text),
        _ => Err(format!(
            "Invalid payload encoding '{}'. Valid options: raw, text",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// Validate configuration and broker connectivity, then exit
    Check,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub broker: Option<BrokerBackend>,
    pub broker_url: Option<String>,
    pub max_msgs: Option<u64>,
    pub max_bytes: Option<u64>,
    pub storage: Option<StorageMedium>,
    pub deliver_policy: Option<DeliverPolicy>,
    pub fetch_wait_ms: Option<u64>,
    pub encoding: Option<PayloadEncoding>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        broker: cli.broker,
        broker_url: cli.broker_url,
        max_msgs: cli.max_msgs,
        max_bytes: cli.max_bytes,
        storage: cli.storage,
        deliver_policy: cli.deliver_policy,
        fetch_wait_ms: cli.fetch_wait_ms,
        encoding: cli.encoding,
    };
    (config, cli.command)
}
