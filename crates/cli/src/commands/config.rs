use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use orderdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> CommandResult {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let path = detect_config_path();
            CommandResult::plain(0, render(&config, path.as_deref()))
        }
        Err(error) => CommandResult::plain(2, format!("config validation failed: {error}")),
    }
}

pub fn render(config: &AppConfig, config_file_path: Option<&Path>) -> String {
    let config_file_doc = load_config_file_doc(config_file_path);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(config) {
        let source =
            field_source(field.key, field.env_keys, config_file_doc.as_ref(), config_file_path);
        lines.push(render_line(field.key, &field.value, source));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let telegram = &config.telegram;
    let ledger = &config.ledger;
    let ordering = &config.ordering;

    vec![
        Field {
            key: "telegram.bot_token",
            value: redact_bot_token(telegram.bot_token.expose_secret()),
            env_keys: &["ORDERDESK_TELEGRAM_BOT_TOKEN", "BOT_TOKEN"],
        },
        Field {
            key: "telegram.operator_chat_id",
            value: telegram.operator_chat_id.to_string(),
            env_keys: &["ORDERDESK_TELEGRAM_OPERATOR_CHAT_ID"],
        },
        Field {
            key: "telegram.api_base_url",
            value: telegram.api_base_url.clone(),
            env_keys: &["ORDERDESK_TELEGRAM_API_BASE_URL"],
        },
        Field {
            key: "webhook.base_url",
            value: config.webhook.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["ORDERDESK_WEBHOOK_BASE_URL", "WEBHOOK_URL"],
        },
        Field {
            key: "webhook.register_on_startup",
            value: config.webhook.register_on_startup.to_string(),
            env_keys: &["ORDERDESK_WEBHOOK_REGISTER_ON_STARTUP"],
        },
        Field {
            key: "ledger.backend",
            value: format!("{:?}", ledger.backend),
            env_keys: &["ORDERDESK_LEDGER_BACKEND"],
        },
        Field {
            key: "ledger.spreadsheet_id",
            value: ledger.spreadsheet_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["ORDERDESK_LEDGER_SPREADSHEET_ID"],
        },
        Field {
            key: "ledger.spreadsheet_name",
            value: ledger.spreadsheet_name.clone(),
            env_keys: &["ORDERDESK_LEDGER_SPREADSHEET_NAME"],
        },
        Field {
            key: "ledger.worksheet",
            value: ledger.worksheet.clone(),
            env_keys: &["ORDERDESK_LEDGER_WORKSHEET"],
        },
        Field {
            key: "ledger.credentials_json",
            value: if ledger.credentials_json.is_some() { "<redacted>" } else { "<unset>" }
                .to_string(),
            env_keys: &["ORDERDESK_LEDGER_CREDENTIALS_JSON", "GOOGLE_CREDS"],
        },
        Field {
            key: "ledger.credentials_path",
            value: ledger
                .credentials_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["ORDERDESK_LEDGER_CREDENTIALS_PATH"],
        },
        Field {
            key: "ledger.database_url",
            value: ledger.database_url.clone(),
            env_keys: &["ORDERDESK_LEDGER_DATABASE_URL"],
        },
        Field {
            key: "ordering.product_max_chars",
            value: ordering.product_max_chars.to_string(),
            env_keys: &["ORDERDESK_ORDERING_PRODUCT_MAX_CHARS"],
        },
        Field {
            key: "ordering.session_ttl_secs",
            value: ordering.session_ttl_secs.to_string(),
            env_keys: &["ORDERDESK_ORDERING_SESSION_TTL_SECS"],
        },
        Field {
            key: "ordering.ledger_max_retries",
            value: ordering.ledger_max_retries.to_string(),
            env_keys: &["ORDERDESK_ORDERING_LEDGER_MAX_RETRIES"],
        },
        Field {
            key: "ordering.ledger_base_delay_ms",
            value: ordering.ledger_base_delay_ms.to_string(),
            env_keys: &["ORDERDESK_ORDERING_LEDGER_BASE_DELAY_MS"],
        },
        Field {
            key: "ordering.ledger_max_delay_ms",
            value: ordering.ledger_max_delay_ms.to_string(),
            env_keys: &["ORDERDESK_ORDERING_LEDGER_MAX_DELAY_MS"],
        },
        Field {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["ORDERDESK_SERVER_BIND_ADDRESS"],
        },
        Field {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["ORDERDESK_SERVER_PORT", "PORT"],
        },
        Field {
            key: "server.lane_idle_secs",
            value: config.server.lane_idle_secs.to_string(),
            env_keys: &["ORDERDESK_SERVER_LANE_IDLE_SECS"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["ORDERDESK_LOGGING_LEVEL", "ORDERDESK_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["ORDERDESK_LOGGING_FORMAT", "ORDERDESK_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("orderdesk.toml"), PathBuf::from("config/orderdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the public bot id, hides the secret half.
fn redact_bot_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use orderdesk_core::config::AppConfig;

    use super::{redact_bot_token, render};

    #[test]
    fn bot_token_keeps_only_the_bot_id() {
        assert_eq!(redact_bot_token("123456:AAE-secret"), "123456:***");
        assert_eq!(redact_bot_token("  "), "<empty>");
        assert_eq!(redact_bot_token("opaque"), "<redacted>");
    }

    #[test]
    fn file_values_are_attributed_to_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("orderdesk.toml");
        fs::write(&path, "[ledger]\nworksheet = \"Замовлення\"\n").expect("write config");

        let mut config = AppConfig::default();
        config.ledger.worksheet = "Замовлення".to_string();
        let output = render(&config, Some(&path));

        let worksheet = output
            .lines()
            .find(|line| line.starts_with("- ledger.worksheet"))
            .expect("worksheet line");
        assert!(worksheet.contains("Замовлення"));
        assert!(worksheet.contains(&format!("file ({})", path.display())));
        let spreadsheet = output
            .lines()
            .find(|line| line.starts_with("- ledger.spreadsheet_name"))
            .expect("spreadsheet line");
        assert!(spreadsheet.ends_with("(source: default)"));
    }
}
