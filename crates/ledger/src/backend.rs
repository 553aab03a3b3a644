use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use orderdesk_core::config::{LedgerBackend, LedgerConfig};
use orderdesk_core::ledger::{LedgerError, OrderLedger};

use crate::sheets::{GoogleSheetsLedger, ServiceAccountKey, SpreadsheetLocator};
use crate::{connect_with_settings, migrations, SqlOrderLedger};

#[derive(Debug, Error)]
pub enum LedgerSetupError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("sheets ledger setup failed: {0}")]
    Sheets(#[source] LedgerError),
}

/// Builds the configured ledger. SQLite ledgers are migrated before use.
pub async fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn OrderLedger>, LedgerSetupError> {
    match config.backend {
        LedgerBackend::Sqlite => {
            let pool = connect_with_settings(
                &config.database_url,
                config.max_connections,
                config.timeout_secs,
            )
            .await
            .map_err(LedgerSetupError::DatabaseConnect)?;
            migrations::run_pending(&pool).await.map_err(LedgerSetupError::Migration)?;
            info!(
                event_name = "system.bootstrap.ledger_ready",
                correlation_id = "bootstrap",
                backend = "sqlite",
                "sqlite ledger migrated"
            );
            Ok(Arc::new(SqlOrderLedger::new(pool)))
        }
        LedgerBackend::Sheets => {
            let key = service_account_key(config).map_err(LedgerSetupError::Sheets)?;
            let ledger = GoogleSheetsLedger::new(
                key,
                spreadsheet_locator(config),
                config.worksheet.clone(),
                Duration::from_secs(config.timeout_secs.max(1)),
            )
            .map_err(LedgerSetupError::Sheets)?;
            info!(
                event_name = "system.bootstrap.ledger_ready",
                correlation_id = "bootstrap",
                backend = "sheets",
                worksheet = %config.worksheet,
                "sheets ledger configured"
            );
            Ok(Arc::new(ledger))
        }
    }
}

/// Inline JSON wins over a key file.
pub fn service_account_key(config: &LedgerConfig) -> Result<ServiceAccountKey, LedgerError> {
    if let Some(raw) = config.credentials_json.as_ref() {
        if !raw.expose_secret().trim().is_empty() {
            return ServiceAccountKey::from_json(raw.expose_secret());
        }
    }
    match config.credentials_path.as_deref() {
        Some(path) => ServiceAccountKey::from_path(path),
        None => Err(LedgerError::Auth("no service account credentials configured".to_owned())),
    }
}

pub fn spreadsheet_locator(config: &LedgerConfig) -> SpreadsheetLocator {
    match config.spreadsheet_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => SpreadsheetLocator::Id(id.to_owned()),
        _ => SpreadsheetLocator::Name(config.spreadsheet_name.clone()),
    }
}
