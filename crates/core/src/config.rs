use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::session::DEFAULT_PRODUCT_MAX_CHARS;
use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub webhook: WebhookConfig,
    pub ledger: LedgerConfig,
    pub ordering: OrderingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub operator_chat_id: i64,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub base_url: Option<String>,
    pub register_on_startup: bool,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub spreadsheet_id: Option<String>,
    pub spreadsheet_name: String,
    pub worksheet: String,
    pub credentials_json: Option<SecretString>,
    pub credentials_path: Option<PathBuf>,
    pub database_url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OrderingConfig {
    pub product_max_chars: usize,
    pub session_ttl_secs: u64,
    pub reap_interval_secs: u64,
    pub ledger_max_retries: u32,
    pub ledger_base_delay_ms: u64,
    pub ledger_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub lane_idle_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    Sheets,
    Sqlite,
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
    pub bot_token: Option<String>,
    pub operator_chat_id: Option<i64>,
    pub webhook_base_url: Option<String>,
    pub register_webhook: Option<bool>,
    pub ledger_backend: Option<LedgerBackend>,
    pub database_url: Option<String>,
    pub credentials_json: Option<String>,
    pub spreadsheet_id: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
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
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                operator_chat_id: 0,
                api_base_url: "https://api.telegram.org".to_string(),
                request_timeout_secs: 15,
            },
            webhook: WebhookConfig { base_url: None, register_on_startup: true },
            ledger: LedgerConfig {
                backend: LedgerBackend::Sheets,
                spreadsheet_id: None,
                spreadsheet_name: "Заказы Бутер".to_string(),
                worksheet: "Лист1".to_string(),
                credentials_json: None,
                credentials_path: None,
                database_url: "sqlite://orderdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            ordering: OrderingConfig {
                product_max_chars: DEFAULT_PRODUCT_MAX_CHARS,
                session_ttl_secs: 30 * 60,
                reap_interval_secs: 60,
                ledger_max_retries: 3,
                ledger_base_delay_ms: 250,
                ledger_max_delay_ms: 4_000,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                lane_idle_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LedgerBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sheets" | "google_sheets" => Ok(Self::Sheets),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::Validation(format!(
                "unsupported ledger backend `{other}` (expected sheets|sqlite)"
            ))),
        }
    }
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("orderdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Webhook route; the bot token in the path is the only shared secret.
    pub fn webhook_path(&self) -> String {
        format!("/webhook/{}", self.telegram.bot_token.expose_secret())
    }

    pub fn webhook_url(&self) -> Option<String> {
        let base = self.webhook.base_url.as_deref()?.trim().trim_end_matches('/');
        Some(format!("{base}{}", self.webhook_path()))
    }

    pub fn ledger_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.ordering.ledger_max_retries,
            base_delay_ms: self.ordering.ledger_base_delay_ms,
            max_delay_ms: self.ordering.ledger_max_delay_ms,
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(telegram) = patch.telegram {
            if let Some(bot_token_value) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token_value);
            }
            if let Some(operator_chat_id) = telegram.operator_chat_id {
                self.telegram.operator_chat_id = operator_chat_id;
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
            if let Some(request_timeout_secs) = telegram.request_timeout_secs {
                self.telegram.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(base_url) = webhook.base_url {
                self.webhook.base_url = Some(base_url);
            }
            if let Some(register_on_startup) = webhook.register_on_startup {
                self.webhook.register_on_startup = register_on_startup;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(backend) = ledger.backend {
                self.ledger.backend = backend;
            }
            if let Some(spreadsheet_id) = ledger.spreadsheet_id {
                self.ledger.spreadsheet_id = Some(spreadsheet_id);
            }
            if let Some(spreadsheet_name) = ledger.spreadsheet_name {
                self.ledger.spreadsheet_name = spreadsheet_name;
            }
            if let Some(worksheet) = ledger.worksheet {
                self.ledger.worksheet = worksheet;
            }
            if let Some(credentials_json_value) = ledger.credentials_json {
                self.ledger.credentials_json = Some(secret_value(credentials_json_value));
            }
            if let Some(credentials_path) = ledger.credentials_path {
                self.ledger.credentials_path = Some(credentials_path);
            }
            if let Some(database_url) = ledger.database_url {
                self.ledger.database_url = database_url;
            }
            if let Some(max_connections) = ledger.max_connections {
                self.ledger.max_connections = max_connections;
            }
            if let Some(timeout_secs) = ledger.timeout_secs {
                self.ledger.timeout_secs = timeout_secs;
            }
        }

        if let Some(ordering) = patch.ordering {
            if let Some(product_max_chars) = ordering.product_max_chars {
                self.ordering.product_max_chars = product_max_chars;
            }
            if let Some(session_ttl_secs) = ordering.session_ttl_secs {
                self.ordering.session_ttl_secs = session_ttl_secs;
            }
            if let Some(reap_interval_secs) = ordering.reap_interval_secs {
                self.ordering.reap_interval_secs = reap_interval_secs;
            }
            if let Some(ledger_max_retries) = ordering.ledger_max_retries {
                self.ordering.ledger_max_retries = ledger_max_retries;
            }
            if let Some(ledger_base_delay_ms) = ordering.ledger_base_delay_ms {
                self.ordering.ledger_base_delay_ms = ledger_base_delay_ms;
            }
            if let Some(ledger_max_delay_ms) = ordering.ledger_max_delay_ms {
                self.ordering.ledger_max_delay_ms = ledger_max_delay_ms;
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
            if let Some(lane_idle_secs) = server.lane_idle_secs {
                self.server.lane_idle_secs = lane_idle_secs;
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
        let bot_token = read_env("ORDERDESK_TELEGRAM_BOT_TOKEN").or_else(|| read_env("BOT_TOKEN"));
        if let Some(value) = bot_token {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("ORDERDESK_TELEGRAM_OPERATOR_CHAT_ID") {
            self.telegram.operator_chat_id =
                parse_i64("ORDERDESK_TELEGRAM_OPERATOR_CHAT_ID", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }
        if let Some(value) = read_env("ORDERDESK_TELEGRAM_REQUEST_TIMEOUT_SECS") {
            self.telegram.request_timeout_secs =
                parse_u64("ORDERDESK_TELEGRAM_REQUEST_TIMEOUT_SECS", &value)?;
        }

        let base_url = read_env("ORDERDESK_WEBHOOK_BASE_URL").or_else(|| read_env("WEBHOOK_URL"));
        if let Some(value) = base_url {
            self.webhook.base_url = Some(value);
        }
        if let Some(value) = read_env("ORDERDESK_WEBHOOK_REGISTER_ON_STARTUP") {
            self.webhook.register_on_startup =
                parse_bool("ORDERDESK_WEBHOOK_REGISTER_ON_STARTUP", &value)?;
        }

        if let Some(value) = read_env("ORDERDESK_LEDGER_BACKEND") {
            self.ledger.backend = value.parse()?;
        }
        if let Some(value) = read_env("ORDERDESK_LEDGER_SPREADSHEET_ID") {
            self.ledger.spreadsheet_id = Some(value);
        }
        if let Some(value) = read_env("ORDERDESK_LEDGER_SPREADSHEET_NAME") {
            self.ledger.spreadsheet_name = value;
        }
        if let Some(value) = read_env("ORDERDESK_LEDGER_WORKSHEET") {
            self.ledger.worksheet = value;
        }
        let credentials =
            read_env("ORDERDESK_LEDGER_CREDENTIALS_JSON").or_else(|| read_env("GOOGLE_CREDS"));
        if let Some(value) = credentials {
            self.ledger.credentials_json = Some(secret_value(value));
        }
        if let Some(value) = read_env("ORDERDESK_LEDGER_CREDENTIALS_PATH") {
            self.ledger.credentials_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("ORDERDESK_LEDGER_DATABASE_URL") {
            self.ledger.database_url = value;
        }
        if let Some(value) = read_env("ORDERDESK_LEDGER_MAX_CONNECTIONS") {
            self.ledger.max_connections = parse_u32("ORDERDESK_LEDGER_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_LEDGER_TIMEOUT_SECS") {
            self.ledger.timeout_secs = parse_u64("ORDERDESK_LEDGER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ORDERDESK_ORDERING_PRODUCT_MAX_CHARS") {
            self.ordering.product_max_chars =
                parse_u32("ORDERDESK_ORDERING_PRODUCT_MAX_CHARS", &value)? as usize;
        }
        if let Some(value) = read_env("ORDERDESK_ORDERING_SESSION_TTL_SECS") {
            self.ordering.session_ttl_secs =
                parse_u64("ORDERDESK_ORDERING_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_ORDERING_REAP_INTERVAL_SECS") {
            self.ordering.reap_interval_secs =
                parse_u64("ORDERDESK_ORDERING_REAP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_ORDERING_LEDGER_MAX_RETRIES") {
            self.ordering.ledger_max_retries =
                parse_u32("ORDERDESK_ORDERING_LEDGER_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_ORDERING_LEDGER_BASE_DELAY_MS") {
            self.ordering.ledger_base_delay_ms =
                parse_u64("ORDERDESK_ORDERING_LEDGER_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_ORDERING_LEDGER_MAX_DELAY_MS") {
            self.ordering.ledger_max_delay_ms =
                parse_u64("ORDERDESK_ORDERING_LEDGER_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("ORDERDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("ORDERDESK_SERVER_PORT").or_else(|| read_env("PORT"));
        if let Some(value) = port {
            self.server.port = parse_u16("ORDERDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("ORDERDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("ORDERDESK_SERVER_LANE_IDLE_SECS") {
            self.server.lane_idle_secs = parse_u64("ORDERDESK_SERVER_LANE_IDLE_SECS", &value)?;
        }

        let log_level =
            read_env("ORDERDESK_LOGGING_LEVEL").or_else(|| read_env("ORDERDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ORDERDESK_LOGGING_FORMAT").or_else(|| read_env("ORDERDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bot_token) = overrides.bot_token {
            self.telegram.bot_token = secret_value(bot_token);
        }
        if let Some(operator_chat_id) = overrides.operator_chat_id {
            self.telegram.operator_chat_id = operator_chat_id;
        }
        if let Some(webhook_base_url) = overrides.webhook_base_url {
            self.webhook.base_url = Some(webhook_base_url);
        }
        if let Some(register_webhook) = overrides.register_webhook {
            self.webhook.register_on_startup = register_webhook;
        }
        if let Some(ledger_backend) = overrides.ledger_backend {
            self.ledger.backend = ledger_backend;
        }
        if let Some(database_url) = overrides.database_url {
            self.ledger.database_url = database_url;
        }
        if let Some(credentials_json) = overrides.credentials_json {
            self.ledger.credentials_json = Some(secret_value(credentials_json));
        }
        if let Some(spreadsheet_id) = overrides.spreadsheet_id {
            self.ledger.spreadsheet_id = Some(spreadsheet_id);
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_telegram(&self.telegram)?;
        validate_webhook(&self.webhook)?;
        validate_ledger(&self.ledger)?;
        validate_ordering(&self.ordering)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("orderdesk.toml"), PathBuf::from("config/orderdesk.toml")]
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

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    let bot_token = telegram.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required. Get it from @BotFather (`/newbot` or `/token`)"
                .to_string(),
        ));
    }
    let well_formed = bot_token.split_once(':').is_some_and(|(bot_id, secret)| {
        !bot_id.is_empty() && bot_id.chars().all(|ch| ch.is_ascii_digit()) && !secret.is_empty()
    });
    if !well_formed {
        return Err(ConfigError::Validation(
            "telegram.bot_token must look like `<bot id>:<secret>` as issued by @BotFather"
                .to_string(),
        ));
    }

    if telegram.operator_chat_id == 0 {
        return Err(ConfigError::Validation(
            "telegram.operator_chat_id is required (chat that is notified of every order)"
                .to_string(),
        ));
    }

    if !is_http_url(&telegram.api_base_url) {
        return Err(ConfigError::Validation(
            "telegram.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if telegram.request_timeout_secs == 0 || telegram.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "telegram.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), ConfigError> {
    match webhook.base_url.as_deref() {
        Some(base_url) if !is_http_url(base_url) => Err(ConfigError::Validation(
            "webhook.base_url must start with http:// or https://".to_string(),
        )),
        None if webhook.register_on_startup => Err(ConfigError::Validation(
            "webhook.base_url is required when webhook.register_on_startup is true".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    match ledger.backend {
        LedgerBackend::Sheets => {
            let has_inline = ledger
                .credentials_json
                .as_ref()
                .map(|value| !value.expose_secret().trim().is_empty())
                .unwrap_or(false);
            if !has_inline && ledger.credentials_path.is_none() {
                return Err(ConfigError::Validation(
                    "ledger.credentials_json or ledger.credentials_path is required for the sheets backend (service account key)"
                        .to_string(),
                ));
            }

            let has_id =
                ledger.spreadsheet_id.as_ref().map(|id| !id.trim().is_empty()).unwrap_or(false);
            if !has_id && ledger.spreadsheet_name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "ledger.spreadsheet_id or ledger.spreadsheet_name must be set".to_string(),
                ));
            }

            if ledger.worksheet.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "ledger.worksheet must not be empty".to_string(),
                ));
            }
        }
        LedgerBackend::Sqlite => {
            let url = ledger.database_url.trim();
            let sqlite_url =
                url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
            if !sqlite_url {
                return Err(ConfigError::Validation(
                    "ledger.database_url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                        .to_string(),
                ));
            }

            if ledger.max_connections == 0 {
                return Err(ConfigError::Validation(
                    "ledger.max_connections must be greater than zero".to_string(),
                ));
            }

            if ledger.timeout_secs == 0 || ledger.timeout_secs > 300 {
                return Err(ConfigError::Validation(
                    "ledger.timeout_secs must be in range 1..=300".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_ordering(ordering: &OrderingConfig) -> Result<(), ConfigError> {
    if ordering.product_max_chars == 0 {
        return Err(ConfigError::Validation(
            "ordering.product_max_chars must be greater than zero".to_string(),
        ));
    }

    if ordering.session_ttl_secs == 0 || ordering.reap_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "ordering.session_ttl_secs and ordering.reap_interval_secs must be greater than zero"
                .to_string(),
        ));
    }

    if ordering.ledger_base_delay_ms > ordering.ledger_max_delay_ms {
        return Err(ConfigError::Validation(
            "ordering.ledger_base_delay_ms must not exceed ordering.ledger_max_delay_ms"
                .to_string(),
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

    if server.lane_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "server.lane_idle_secs must be greater than zero".to_string(),
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

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    telegram: Option<TelegramPatch>,
    webhook: Option<WebhookPatch>,
    ledger: Option<LedgerPatch>,
    ordering: Option<OrderingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    operator_chat_id: Option<i64>,
    api_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    base_url: Option<String>,
    register_on_startup: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    backend: Option<LedgerBackend>,
    spreadsheet_id: Option<String>,
    spreadsheet_name: Option<String>,
    worksheet: Option<String>,
    credentials_json: Option<String>,
    credentials_path: Option<PathBuf>,
    database_url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrderingPatch {
    product_max_chars: Option<usize>,
    session_ttl_secs: Option<u64>,
    reap_interval_secs: Option<u64>,
    ledger_max_retries: Option<u32>,
    ledger_base_delay_ms: Option<u64>,
    ledger_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    lane_idle_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
