use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use renta_agent::{
    ChatModelConfig, Dependencies, OpenAiChatModel, Orchestrator, OrchestratorConfig, SessionStore,
};
use renta_core::config::{AppConfig, ConfigError, LoadOptions};
use renta_db::repositories::{
    SqlConversationLogRepository, SqlCustomerRepository, SqlDashboardReader, SqlInterestRepository,
};
use renta_db::{connect, migrations, DbPool};
use renta_retrieval::{
    build_or_load, ChunkSettings, EmbeddingConfig, OpenAiEmbeddingClient, Retriever,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionStore>,
    pub retriever: Arc<Retriever>,
    pub dashboard: Arc<SqlDashboardReader>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("embedding client rejected its configuration: {0}")]
    Embedding(#[from] renta_retrieval::EmbeddingError),
    #[error("catalog index unavailable: {0}")]
    Index(#[from] renta_retrieval::IndexError),
    #[error("chat model rejected its configuration: {0}")]
    ChatModel(#[from] renta_agent::LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Wires the whole service: database, migrations, catalog index, chat
/// model, and the orchestrator. Any failure here is fatal: serving chat
/// without the catalog or the CRM gives wrong answers, so the process
/// refuses to start instead of degrading silently.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        profile = config.llm.profile.as_str(),
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|secret| secret.expose_secret().to_string())
        .ok_or_else(|| ConfigError::Validation("llm.api_key is required".to_string()))?;

    let embedder = Arc::new(OpenAiEmbeddingClient::new(EmbeddingConfig {
        api_key: api_key.clone(),
        base_url: config.llm.base_url.clone(),
        model: config.llm.embedding_model.clone(),
        timeout_secs: config.llm.timeout_secs,
        max_retries: config.llm.max_retries,
        retry_delay_ms: config.llm.retry_delay_ms,
    })?);

    let index = build_or_load(
        &config.retrieval.source_path,
        &config.retrieval.index_dir,
        ChunkSettings {
            chunk_size: config.retrieval.chunk_size,
            chunk_overlap: config.retrieval.chunk_overlap,
        },
        embedder.as_ref(),
    )
    .await?;
    info!(
        event_name = "system.bootstrap.index_ready",
        correlation_id = "bootstrap",
        chunks = index.len(),
        fingerprint = %index.fingerprint(),
        "catalog index ready"
    );

    let retriever = Arc::new(Retriever::new(
        index,
        embedder,
        config.retrieval.top_k,
        config.retrieval.top_k_max,
    ));

    let chat_model = Arc::new(OpenAiChatModel::new(ChatModelConfig {
        api_key,
        base_url: config.llm.base_url.clone(),
        model: config.chat_model().to_string(),
        temperature: config.llm.profile.temperature(),
        max_tokens: config.llm.profile.max_reply_tokens(),
        timeout_secs: config.llm.timeout_secs,
        max_retries: config.llm.max_retries,
        retry_delay_ms: config.llm.retry_delay_ms,
    })?);

    let rate_policy = config.rate_policy()?;
    let deps = Dependencies {
        chat_model,
        retriever: Arc::clone(&retriever),
        rate_policy,
        stock: config.stock_table(),
        customers: Arc::new(SqlCustomerRepository::new(db_pool.clone())),
        interests: Arc::new(SqlInterestRepository::new(db_pool.clone())),
        conversation_log: Arc::new(SqlConversationLogRepository::new(db_pool.clone())),
    };

    let sessions = Arc::new(SessionStore::new(config.agent.max_session_turns));
    let orchestrator = Arc::new(Orchestrator::new(
        deps,
        OrchestratorConfig {
            profile: config.llm.profile,
            max_planning_rounds: config.agent.max_planning_rounds,
            max_tool_retries: config.agent.max_tool_retries,
            tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
            turn_timeout: Duration::from_secs(config.agent.turn_timeout_secs),
            prompt_price_per_1k: config.llm.prompt_price_per_1k,
            completion_price_per_1k: config.llm.completion_price_per_1k,
            default_lead_time_days: config.scheduling.default_lead_time_days,
            business_days_only: config.scheduling.business_days_only,
            holidays: config.scheduling.holidays.clone(),
        },
        Arc::clone(&sessions),
    ));

    let dashboard = Arc::new(SqlDashboardReader::new(db_pool.clone()));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        "application bootstrap complete"
    );

    Ok(Application { config, db_pool, orchestrator, sessions, retriever, dashboard })
}
