use std::sync::Arc;

use intake_agent::{
    AgentRuntime, LlmError, LlmOracle, NhtsaClient, OpenAiCompatibleClient, RuntimeSettings,
    Stores, ToolPolicy, ToolRegistry, ZenQuotesClient,
};
use intake_core::config::{AppConfig, ConfigError};
use intake_db::{connect_from_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] LlmError),
    #[error("lookup client setup failed: {0}")]
    Lookup(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    let lookup = NhtsaClient::from_config(&config.lookup).map_err(BootstrapError::Lookup)?;
    let quotes = ZenQuotesClient::from_config(&config.lookup).map_err(BootstrapError::Lookup)?;
    let oracle = LlmOracle::new(
        Arc::new(llm),
        ToolRegistry::intake(Arc::new(lookup), Arc::new(quotes)),
        ToolPolicy::default(),
    );
    let runtime = AgentRuntime::new(
        Stores::sql(db_pool.clone()),
        Arc::new(oracle),
        RuntimeSettings::from(&config.conversation),
    );
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        max_auto_advance = config.conversation.max_auto_advance,
        "agent runtime initialized"
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}
