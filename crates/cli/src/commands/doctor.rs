use orderdesk_core::config::{AppConfig, LedgerBackend, LoadOptions};
use orderdesk_core::ledger::OrderLedger;
use orderdesk_ledger::{connect_with_settings, open_ledger, SqlOrderLedger};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::plain(exit_code, output);
    }

    CommandResult::plain(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_webhook(&config));
            checks.push(check_ledger_readiness(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["webhook_registration", "ledger_readiness"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_webhook(config: &AppConfig) -> DoctorCheck {
    if !config.webhook.register_on_startup {
        return DoctorCheck {
            name: "webhook_registration",
            status: CheckStatus::Skipped,
            details: "startup registration disabled; webhook is managed externally".to_string(),
        };
    }

    match config.webhook.base_url.as_deref() {
        Some(base_url) => DoctorCheck {
            name: "webhook_registration",
            status: CheckStatus::Pass,
            details: format!("webhook will be registered under `{base_url}/webhook/<token>`"),
        },
        None => DoctorCheck {
            name: "webhook_registration",
            status: CheckStatus::Fail,
            details: "webhook.base_url is not set".to_string(),
        },
    }
}

fn check_ledger_readiness(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "ledger_readiness",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        match config.ledger.backend {
            // Opening the SQLite ledger would migrate it; doctor only looks.
            LedgerBackend::Sqlite => {
                let pool = connect_with_settings(
                    &config.ledger.database_url,
                    config.ledger.max_connections,
                    config.ledger.timeout_secs,
                )
                .await
                .map_err(|error| format!("failed to connect to ledger database: {error}"))?;
                let ledger = SqlOrderLedger::new(pool.clone());
                let readiness = ledger.readiness().await.map_err(|error| {
                    format!("{error}; run `orderdesk migrate` to create the ledger table")
                });
                pool.close().await;
                readiness
            }
            LedgerBackend::Sheets => {
                let ledger = open_ledger(&config.ledger)
                    .await
                    .map_err(|error| format!("failed to set up sheets ledger: {error}"))?;
                ledger.readiness().await.map_err(|error| error.to_string())
            }
        }
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "ledger_readiness",
            status: CheckStatus::Pass,
            details: format!("{:?} ledger is ready", config.ledger.backend),
        },
        Err(details) => {
            DoctorCheck { name: "ledger_readiness", status: CheckStatus::Fail, details }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
