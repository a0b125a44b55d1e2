use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calc::availability::{StockEntry, StockTable};
use crate::calc::pricing::{DiscountTier, RatePolicy};
use crate::profile::Profile;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub agent: AgentConfig,
    pub pricing: PricingConfig,
    pub inventory: InventoryConfig,
    pub scheduling: SchedulingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub chat_model: Option<String>,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub profile: Profile,
    pub prompt_price_per_1k: f64,
    pub completion_price_per_1k: f64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub source_path: PathBuf,
    pub index_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub top_k_max: usize,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_planning_rounds: u32,
    pub max_tool_retries: u32,
    pub tool_timeout_secs: u64,
    pub turn_timeout_secs: u64,
    pub max_session_turns: usize,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub tiers: Vec<DiscountTier>,
}

#[derive(Clone, Debug)]
pub struct InventoryConfig {
    pub items: Vec<StockEntry>,
}

#[derive(Clone, Debug)]
pub struct SchedulingConfig {
    pub default_lead_time_days: u32,
    pub business_days_only: bool,
    pub holidays: Vec<NaiveDate>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub api_key: Option<String>,
    pub profile: Option<Profile>,
    pub chat_model: Option<String>,
    pub source_path: Option<PathBuf>,
    pub index_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://renta_crm.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                chat_model: None,
                embedding_model: "text-embedding-3-small".to_string(),
                timeout_secs: 30,
                max_retries: 3,
                retry_delay_ms: 500,
                profile: Profile::Balanced,
                prompt_price_per_1k: 0.000_15,
                completion_price_per_1k: 0.000_6,
            },
            retrieval: RetrievalConfig {
                source_path: PathBuf::from("catalog/equipos_construccion.md"),
                index_dir: PathBuf::from("vectorstore"),
                chunk_size: 500,
                chunk_overlap: 100,
                top_k: 3,
                top_k_max: 10,
            },
            agent: AgentConfig {
                max_planning_rounds: 5,
                max_tool_retries: 2,
                tool_timeout_secs: 10,
                turn_timeout_secs: 60,
                max_session_turns: 40,
            },
            pricing: PricingConfig {
                tiers: vec![
                    DiscountTier { min_days: 7, percent: 10u32.into() },
                    DiscountTier { min_days: 14, percent: 15u32.into() },
                    DiscountTier { min_days: 30, percent: 20u32.into() },
                ],
            },
            inventory: InventoryConfig { items: StockTable::standard().into_entries() },
            scheduling: SchedulingConfig {
                default_lead_time_days: 1,
                business_days_only: true,
                holidays: Vec::new(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("renta.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Explicit model name wins; otherwise the profile picks.
    pub fn chat_model(&self) -> &str {
        self.llm.chat_model.as_deref().unwrap_or_else(|| self.llm.profile.default_chat_model())
    }

    pub fn rate_policy(&self) -> Result<RatePolicy, ConfigError> {
        RatePolicy::new(self.pricing.tiers.clone())
            .map_err(|error| ConfigError::Validation(format!("pricing.tiers: {error}")))
    }

    pub fn stock_table(&self) -> StockTable {
        StockTable::new(self.inventory.items.clone())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(chat_model) = llm.chat_model {
                self.llm.chat_model = Some(chat_model);
            }
            if let Some(embedding_model) = llm.embedding_model {
                self.llm.embedding_model = embedding_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_delay_ms) = llm.retry_delay_ms {
                self.llm.retry_delay_ms = retry_delay_ms;
            }
            if let Some(profile) = llm.profile {
                self.llm.profile = profile;
            }
            if let Some(prompt_price) = llm.prompt_price_per_1k {
                self.llm.prompt_price_per_1k = prompt_price;
            }
            if let Some(completion_price) = llm.completion_price_per_1k {
                self.llm.completion_price_per_1k = completion_price;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(source_path) = retrieval.source_path {
                self.retrieval.source_path = source_path;
            }
            if let Some(index_dir) = retrieval.index_dir {
                self.retrieval.index_dir = index_dir;
            }
            if let Some(chunk_size) = retrieval.chunk_size {
                self.retrieval.chunk_size = chunk_size;
            }
            if let Some(chunk_overlap) = retrieval.chunk_overlap {
                self.retrieval.chunk_overlap = chunk_overlap;
            }
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(top_k_max) = retrieval.top_k_max {
                self.retrieval.top_k_max = top_k_max;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_planning_rounds) = agent.max_planning_rounds {
                self.agent.max_planning_rounds = max_planning_rounds;
            }
            if let Some(max_tool_retries) = agent.max_tool_retries {
                self.agent.max_tool_retries = max_tool_retries;
            }
            if let Some(tool_timeout_secs) = agent.tool_timeout_secs {
                self.agent.tool_timeout_secs = tool_timeout_secs;
            }
            if let Some(turn_timeout_secs) = agent.turn_timeout_secs {
                self.agent.turn_timeout_secs = turn_timeout_secs;
            }
            if let Some(max_session_turns) = agent.max_session_turns {
                self.agent.max_session_turns = max_session_turns;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(tiers) = pricing.tiers {
                self.pricing.tiers = tiers;
            }
        }

        if let Some(inventory) = patch.inventory {
            if let Some(items) = inventory.items {
                self.inventory.items = items;
            }
        }

        if let Some(scheduling) = patch.scheduling {
            if let Some(default_lead_time_days) = scheduling.default_lead_time_days {
                self.scheduling.default_lead_time_days = default_lead_time_days;
            }
            if let Some(business_days_only) = scheduling.business_days_only {
                self.scheduling.business_days_only = business_days_only;
            }
            if let Some(holidays) = scheduling.holidays {
                self.scheduling.holidays = holidays;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RENTA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RENTA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("RENTA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RENTA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RENTA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RENTA_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("RENTA_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("RENTA_LLM_CHAT_MODEL") {
            self.llm.chat_model = Some(value);
        }
        if let Some(value) = read_env("RENTA_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = value;
        }
        if let Some(value) = read_env("RENTA_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("RENTA_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RENTA_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("RENTA_LLM_MAX_RETRIES", &value)?;
        }
        let profile = read_env("RENTA_LLM_PROFILE").or_else(|| read_env("RENTA_PROFILE"));
        if let Some(value) = profile {
            self.llm.profile = value.parse()?;
        }

        if let Some(value) = read_env("RENTA_RETRIEVAL_SOURCE_PATH") {
            self.retrieval.source_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("RENTA_RETRIEVAL_INDEX_DIR") {
            self.retrieval.index_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("RENTA_RETRIEVAL_CHUNK_SIZE") {
            self.retrieval.chunk_size = parse_usize("RENTA_RETRIEVAL_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = read_env("RENTA_RETRIEVAL_CHUNK_OVERLAP") {
            self.retrieval.chunk_overlap = parse_usize("RENTA_RETRIEVAL_CHUNK_OVERLAP", &value)?;
        }
        if let Some(value) = read_env("RENTA_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_usize("RENTA_RETRIEVAL_TOP_K", &value)?;
        }

        if let Some(value) = read_env("RENTA_AGENT_TURN_TIMEOUT_SECS") {
            self.agent.turn_timeout_secs = parse_u64("RENTA_AGENT_TURN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RENTA_AGENT_MAX_SESSION_TURNS") {
            self.agent.max_session_turns = parse_usize("RENTA_AGENT_MAX_SESSION_TURNS", &value)?;
        }

        if let Some(value) = read_env("RENTA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RENTA_SERVER_PORT") {
            self.server.port = parse_u16("RENTA_SERVER_PORT", &value)?;
        }

        let log_level = read_env("RENTA_LOGGING_LEVEL").or_else(|| read_env("RENTA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("RENTA_LOGGING_FORMAT").or_else(|| read_env("RENTA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(api_key) = overrides.api_key {
            self.llm.api_key = Some(secret_value(api_key));
        }
        if let Some(profile) = overrides.profile {
            self.llm.profile = profile;
        }
        if let Some(chat_model) = overrides.chat_model {
            self.llm.chat_model = Some(chat_model);
        }
        if let Some(source_path) = overrides.source_path {
            self.retrieval.source_path = source_path;
        }
        if let Some(index_dir) = overrides.index_dir {
            self.retrieval.index_dir = index_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_retrieval(&self.retrieval)?;
        validate_agent(&self.agent)?;
        self.rate_policy().map(|_| ())?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("renta.toml"), PathBuf::from("config/renta.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    let missing =
        llm.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true);
    if missing {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set RENTA_LLM_API_KEY or [llm] api_key)".to_string(),
        ));
    }

    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.embedding_model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.embedding_model must not be empty".to_string()));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation("llm.timeout_secs must be in range 1..=300".to_string()));
    }

    if llm.prompt_price_per_1k < 0.0 || llm.completion_price_per_1k < 0.0 {
        return Err(ConfigError::Validation(
            "llm token prices must not be negative".to_string(),
        ));
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if retrieval.chunk_size == 0 {
        return Err(ConfigError::Validation(
            "retrieval.chunk_size must be greater than zero".to_string(),
        ));
    }

    if retrieval.chunk_overlap >= retrieval.chunk_size {
        return Err(ConfigError::Validation(
            "retrieval.chunk_overlap must be smaller than retrieval.chunk_size".to_string(),
        ));
    }

    if retrieval.top_k == 0 || retrieval.top_k_max == 0 {
        return Err(ConfigError::Validation(
            "retrieval.top_k and retrieval.top_k_max must be greater than zero".to_string(),
        ));
    }

    if retrieval.top_k > retrieval.top_k_max {
        return Err(ConfigError::Validation(
            "retrieval.top_k must not exceed retrieval.top_k_max".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_planning_rounds == 0 {
        return Err(ConfigError::Validation(
            "agent.max_planning_rounds must be greater than zero".to_string(),
        ));
    }

    if agent.tool_timeout_secs == 0 || agent.tool_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "agent.tool_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if agent.turn_timeout_secs < agent.tool_timeout_secs {
        return Err(ConfigError::Validation(
            "agent.turn_timeout_secs must be at least agent.tool_timeout_secs".to_string(),
        ));
    }

    if agent.max_session_turns == 0 {
        return Err(ConfigError::Validation(
            "agent.max_session_turns must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    retrieval: Option<RetrievalPatch>,
    agent: Option<AgentPatch>,
    pricing: Option<PricingPatch>,
    inventory: Option<InventoryPatch>,
    scheduling: Option<SchedulingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    chat_model: Option<String>,
    embedding_model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    profile: Option<Profile>,
    prompt_price_per_1k: Option<f64>,
    completion_price_per_1k: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    source_path: Option<PathBuf>,
    index_dir: Option<PathBuf>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    top_k: Option<usize>,
    top_k_max: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_planning_rounds: Option<u32>,
    max_tool_retries: Option<u32>,
    tool_timeout_secs: Option<u64>,
    turn_timeout_secs: Option<u64>,
    max_session_turns: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    tiers: Option<Vec<DiscountTier>>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryPatch {
    items: Option<Vec<StockEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulingPatch {
    default_lead_time_days: Option<u32>,
    business_days_only: Option<bool>,
    holidays: Option<Vec<NaiveDate>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::profile::Profile;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RENTA_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("renta.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_RENTA_API_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let api_key = config.llm.api_key.as_ref().ok_or("api key should be set")?;
            ensure(
                api_key.expose_secret() == "sk-from-env",
                "api key should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_RENTA_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RENTA_LLM_API_KEY", "sk-test");
        env::set_var("RENTA_LOG_LEVEL", "warn");
        env::set_var("RENTA_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["RENTA_LLM_API_KEY", "RENTA_LOG_LEVEL", "RENTA_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RENTA_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("RENTA_LLM_API_KEY", "sk-from-env");
        env::set_var("RENTA_PROFILE", "economical");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("renta.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
api_key = "sk-from-file"
profile = "premium"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            let api_key = config.llm.api_key.as_ref().ok_or("api key should be set")?;
            ensure(
                api_key.expose_secret() == "sk-from-env",
                "env api key should win over file and defaults",
            )?;
            ensure(
                config.llm.profile == Profile::Economical,
                "env profile should win over file profile",
            )?;
            Ok(())
        })();

        clear_vars(&["RENTA_DATABASE_URL", "RENTA_LLM_API_KEY", "RENTA_PROFILE"]);
        result
    }

    #[test]
    fn validation_fails_fast_without_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        clear_vars(&["RENTA_LLM_API_KEY"]);
        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("llm.api_key")
        );
        ensure(has_message, "validation failure should mention llm.api_key")
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RENTA_LLM_API_KEY", "sk-test");
        env::set_var("RENTA_RETRIEVAL_CHUNK_SIZE", "100");
        env::set_var("RENTA_RETRIEVAL_CHUNK_OVERLAP", "100");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected chunk_overlap validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("chunk_overlap")
                ),
                "validation failure should mention chunk_overlap",
            )
        })();

        clear_vars(&[
            "RENTA_LLM_API_KEY",
            "RENTA_RETRIEVAL_CHUNK_SIZE",
            "RENTA_RETRIEVAL_CHUNK_OVERLAP",
        ]);
        result
    }

    #[test]
    fn pricing_tiers_load_from_file_and_are_validated() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RENTA_LLM_API_KEY", "sk-test");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("renta.toml");
            fs::write(
                &path,
                r#"
[pricing]
tiers = [
  { min_days = 5, percent = 5 },
  { min_days = 10, percent = 12 },
]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            let policy = config.rate_policy().map_err(|err| err.to_string())?;
            ensure(
                policy.discount_for(10) == 12u32.into(),
                "ten-day rental should land in the twelve-percent tier",
            )?;

            let bad_path = dir.path().join("bad.toml");
            fs::write(
                &bad_path,
                r#"
[pricing]
tiers = [
  { min_days = 5, percent = 15 },
  { min_days = 10, percent = 5 },
]
"#,
            )
            .map_err(|err| err.to_string())?;

            ensure(
                AppConfig::load(LoadOptions {
                    config_path: Some(bad_path),
                    ..LoadOptions::default()
                })
                .is_err(),
                "decreasing tier table should fail validation",
            )?;
            Ok(())
        })();

        clear_vars(&["RENTA_LLM_API_KEY"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RENTA_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["RENTA_LLM_API_KEY"]);
        result
    }

    #[test]
    fn chat_model_falls_back_to_profile_default() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RENTA_LLM_API_KEY", "sk-test");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    profile: Some(Profile::Premium),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.chat_model() == "gpt-4o", "premium should pick the larger model")?;

            let pinned = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    profile: Some(Profile::Premium),
                    chat_model: Some("gpt-4o-mini".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                pinned.chat_model() == "gpt-4o-mini",
                "explicit chat_model should win over the profile default",
            )?;
            Ok(())
        })();

        clear_vars(&["RENTA_LLM_API_KEY"]);
        result
    }
}
