use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::broker::{self, BrokerClient};
use crate::domain::{FetchBridge, ProvisioningCoordinator, PublishBridge};
use crate::utils::url::redact_url;

pub struct CoreApp {
    pub config: AppConfig,
    pub broker: Arc<dyn BrokerClient>,
    pub coordinator: Arc<ProvisioningCoordinator>,
    pub publisher: Arc<PublishBridge>,
    pub fetcher: Arc<FetchBridge>,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Check) => Self::check(&cli_config).await,
            Some(Commands::Start) | None => {
                let app = Self::init(&cli_config).await?;
                Self::start_server(app).await
            }
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let broker = Self::connect_broker(&config).await?;

        let app = Self::with_broker(config, broker);
        app.provision_default_unit().await?;
        Ok(app)
    }

    /// Wire the bridges around an already connected broker
    pub fn with_broker(config: AppConfig, broker: Arc<dyn BrokerClient>) -> Self {
        let coordinator = Arc::new(ProvisioningCoordinator::new(
            broker.clone(),
            config.provisioning.memory_ttl,
            config.provisioning.memory_capacity,
        ));
        let publisher = Arc::new(PublishBridge::new(
            broker.clone(),
            coordinator.clone(),
            config.storage.template.clone(),
        ));
        let fetcher = Arc::new(FetchBridge::new(
            broker.clone(),
            coordinator.clone(),
            config.storage.template.clone(),
            config.cursor.clone(),
        ));
        let shutdown = ShutdownService::new(broker.clone());

        Self {
            config,
            broker,
            coordinator,
            publisher,
            fetcher,
            shutdown,
        }
    }

    async fn connect_broker(config: &AppConfig) -> Result<Arc<dyn BrokerClient>> {
        let broker = broker::connect(&config.broker).await.with_context(|| {
            match config.broker.url.as_deref() {
                Some(url) => format!(
                    "Failed to connect to {} broker at {}",
                    config.broker.backend,
                    redact_url(url)
                ),
                None => format!("Failed to initialize {} broker", config.broker.backend),
            }
        })?;
        tracing::debug!(backend = broker.backend_name(), "Broker initialized");
        Ok(broker)
    }

    /// Create the startup storage unit; an existing one is left as is
    pub async fn provision_default_unit(&self) -> Result<()> {
        if !self.config.storage.default_unit.enabled {
            tracing::debug!("Default storage unit disabled by config");
            return Ok(());
        }

        let spec = self.config.storage.default_unit_spec();
        self.coordinator
            .ensure_storage_unit(&spec)
            .await
            .with_context(|| format!("Failed to provision storage unit '{}'", spec.name))?;
        Ok(())
    }

    /// Validate configuration and broker connectivity without serving
    async fn check(cli: &CliConfig) -> Result<()> {
        let config = AppConfig::load(cli)?;
        let broker = Self::connect_broker(&config).await?;

        let result = broker
            .health_check()
            .await
            .context("Broker health check failed");
        broker.close().await;
        result?;

        println!("Configuration OK (broker: {})", config.broker.backend);
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();

        banner::print_banner(&app.config, app.broker.backend_name());

        let server = ApiServer::new(app);
        let app = server.start().await?;

        // Normally already closed by the graceful shutdown signal
        if !app.shutdown.is_triggered() {
            app.shutdown.shutdown().await;
        }

        Ok(())
    }
}
