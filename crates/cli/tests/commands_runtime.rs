use std::env;
use std::sync::{Mutex, OnceLock};

use orderdesk_cli::commands::{config, doctor, migrate};
use serde_json::Value;

const VALID_ENV: &[(&str, &str)] = &[
    ("ORDERDESK_TELEGRAM_BOT_TOKEN", "123456:test-secret"),
    ("ORDERDESK_TELEGRAM_OPERATOR_CHAT_ID", "-1001"),
    ("ORDERDESK_WEBHOOK_REGISTER_ON_STARTUP", "false"),
    ("ORDERDESK_LEDGER_BACKEND", "sqlite"),
    ("ORDERDESK_LEDGER_DATABASE_URL", "sqlite::memory:"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_token() {
    with_env(&[], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn migrate_refuses_sheets_backend() {
    let mut vars: Vec<(&str, &str)> = VALID_ENV.to_vec();
    vars.retain(|(key, _)| *key != "ORDERDESK_LEDGER_BACKEND");
    vars.push(("ORDERDESK_LEDGER_BACKEND", "sheets"));
    vars.push(("ORDERDESK_LEDGER_CREDENTIALS_PATH", "/etc/orderdesk/service-account.json"));

    with_env(&vars, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "unsupported_backend");
    });
}

#[test]
fn doctor_passes_once_file_ledger_is_migrated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
    let mut vars: Vec<(&str, &str)> = VALID_ENV.to_vec();
    vars.retain(|(key, _)| *key != "ORDERDESK_LEDGER_DATABASE_URL");
    vars.push(("ORDERDESK_LEDGER_DATABASE_URL", url.as_str()));

    with_env(&vars, || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1, "unmigrated ledger is not ready");
        let report = parse_payload(&before.output);
        let ledger = check(&report, "ledger_readiness");
        assert_eq!(ledger["status"], "fail");
        assert!(ledger["details"].as_str().unwrap_or_default().contains("orderdesk migrate"));

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "doctor output: {}", after.output);
        let report = parse_payload(&after.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(check(&report, "config_validation")["status"], "pass");
        assert_eq!(check(&report, "webhook_registration")["status"], "skipped");
        assert_eq!(check(&report, "ledger_readiness")["status"], "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_invalid() {
    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] ledger_readiness"));
    });
}

#[test]
fn config_redacts_secrets_and_names_aliased_env_source() {
    let mut vars: Vec<(&str, &str)> = VALID_ENV.to_vec();
    vars.retain(|(key, _)| *key != "ORDERDESK_TELEGRAM_BOT_TOKEN");
    vars.push(("BOT_TOKEN", "777000:very-secret"));
    vars.push(("GOOGLE_CREDS", "{\"private_key\":\"hidden\"}"));

    with_env(&vars, || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);
        assert!(!result.output.contains("very-secret"));
        assert!(!result.output.contains("hidden"));
        assert!(result
            .output
            .contains("- telegram.bot_token = 777000:*** (source: env (BOT_TOKEN))"));
        assert!(result
            .output
            .contains("- ledger.credentials_json = <redacted> (source: env (GOOGLE_CREDS))"));
    });
}

#[test]
fn config_attributes_backoff_and_lane_idle_to_env() {
    let mut vars: Vec<(&str, &str)> = VALID_ENV.to_vec();
    vars.push(("ORDERDESK_ORDERING_LEDGER_MAX_DELAY_MS", "9000"));
    vars.push(("ORDERDESK_SERVER_LANE_IDLE_SECS", "45"));

    with_env(&vars, || {
        let result = config::run();
        assert_eq!(result.exit_code, 0, "config output: {}", result.output);
        assert!(result.output.contains(
            "- ordering.ledger_max_delay_ms = 9000 (source: env (ORDERDESK_ORDERING_LEDGER_MAX_DELAY_MS))"
        ));
        assert!(result
            .output
            .contains("- server.lane_idle_secs = 45 (source: env (ORDERDESK_SERVER_LANE_IDLE_SECS))"));
        assert!(result.output.contains("- ordering.ledger_base_delay_ms = 250 (source: default)"));
    });
}

fn check<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("missing check {name}"))
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "ORDERDESK_TELEGRAM_BOT_TOKEN",
        "BOT_TOKEN",
        "ORDERDESK_TELEGRAM_OPERATOR_CHAT_ID",
        "ORDERDESK_TELEGRAM_API_BASE_URL",
        "ORDERDESK_TELEGRAM_REQUEST_TIMEOUT_SECS",
        "ORDERDESK_WEBHOOK_BASE_URL",
        "WEBHOOK_URL",
        "ORDERDESK_WEBHOOK_REGISTER_ON_STARTUP",
        "ORDERDESK_LEDGER_BACKEND",
        "ORDERDESK_LEDGER_SPREADSHEET_ID",
        "ORDERDESK_LEDGER_SPREADSHEET_NAME",
        "ORDERDESK_LEDGER_WORKSHEET",
        "ORDERDESK_LEDGER_CREDENTIALS_JSON",
        "GOOGLE_CREDS",
        "ORDERDESK_LEDGER_CREDENTIALS_PATH",
        "ORDERDESK_LEDGER_DATABASE_URL",
        "ORDERDESK_LEDGER_MAX_CONNECTIONS",
        "ORDERDESK_LEDGER_TIMEOUT_SECS",
        "ORDERDESK_ORDERING_PRODUCT_MAX_CHARS",
        "ORDERDESK_ORDERING_SESSION_TTL_SECS",
        "ORDERDESK_ORDERING_REAP_INTERVAL_SECS",
        "ORDERDESK_ORDERING_LEDGER_MAX_RETRIES",
        "ORDERDESK_ORDERING_LEDGER_BASE_DELAY_MS",
        "ORDERDESK_ORDERING_LEDGER_MAX_DELAY_MS",
        "ORDERDESK_SERVER_BIND_ADDRESS",
        "ORDERDESK_SERVER_PORT",
        "PORT",
        "ORDERDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "ORDERDESK_SERVER_LANE_IDLE_SECS",
        "ORDERDESK_LOGGING_LEVEL",
        "ORDERDESK_LOGGING_FORMAT",
        "ORDERDESK_LOG_LEVEL",
        "ORDERDESK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
