//! Google Sheets ledger: each committed order becomes one appended row.

pub mod auth;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use orderdesk_core::domain::order::OrderRecord;
use orderdesk_core::ledger::{LedgerError, OrderLedger};

pub use auth::{AccessTokenProvider, ServiceAccountKey, SHEETS_SCOPES};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";

const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";
const ERROR_EXCERPT_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpreadsheetLocator {
    Id(String),
    /// Resolved once through the Drive files search.
    Name(String),
}

#[derive(Clone, Debug)]
pub struct SheetsEndpoints {
    pub sheets_base_url: String,
    pub drive_base_url: String,
}

impl Default for SheetsEndpoints {
    fn default() -> Self {
        Self {
            sheets_base_url: SHEETS_API_BASE.to_owned(),
            drive_base_url: DRIVE_API_BASE.to_owned(),
        }
    }
}

pub struct GoogleSheetsLedger {
    http: reqwest::Client,
    tokens: AccessTokenProvider,
    endpoints: SheetsEndpoints,
    locator: SpreadsheetLocator,
    worksheet: String,
    resolved_id: OnceCell<String>,
}

#[derive(Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

impl GoogleSheetsLedger {
    pub fn new(
        key: ServiceAccountKey,
        locator: SpreadsheetLocator,
        worksheet: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        Self::with_endpoints(key, locator, worksheet, timeout, SheetsEndpoints::default())
    }

    pub fn with_endpoints(
        key: ServiceAccountKey,
        locator: SpreadsheetLocator,
        worksheet: impl Into<String>,
        timeout: Duration,
        endpoints: SheetsEndpoints,
    ) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(transport_error)?;
        let tokens = AccessTokenProvider::new(http.clone(), key, SHEETS_SCOPES)?;

        Ok(Self {
            http,
            tokens,
            endpoints,
            locator,
            worksheet: worksheet.into(),
            resolved_id: OnceCell::new(),
        })
    }

    /// A1 range covering the eight ledger columns of the worksheet.
    pub fn append_range(&self) -> String {
        format!("'{}'!A:H", self.worksheet.replace('\'', "''"))
    }

    async fn spreadsheet_id(&self) -> Result<&str, LedgerError> {
        match &self.locator {
            SpreadsheetLocator::Id(id) => Ok(id.as_str()),
            SpreadsheetLocator::Name(name) => self
                .resolved_id
                .get_or_try_init(|| self.find_spreadsheet(name))
                .await
                .map(String::as_str),
        }
    }

    async fn find_spreadsheet(&self, name: &str) -> Result<String, LedgerError> {
        let token = self.tokens.access_token().await?;
        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME_TYPE}' and trashed = false",
            escape_query_literal(name)
        );
        let url = format!("{}/drive/v3/files", self.endpoints.drive_base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .query(&[("q", query.as_str()), ("fields", "files(id,name)"), ("pageSize", "10")])
            .send()
            .await
            .map_err(transport_error)?;
        let listing: DriveFileList = read_json(response).await?;

        let mut files = listing.files.into_iter();
        let Some(first) = files.next() else {
            return Err(LedgerError::Rejected(format!(
                "no spreadsheet named `{name}` is shared with the service account"
            )));
        };
        if files.next().is_some() {
            warn!(
                event_name = "ledger.sheets.ambiguous_name",
                spreadsheet_name = %name,
                spreadsheet_id = %first.id,
                "several spreadsheets share this name; using the first match"
            );
        }
        info!(
            event_name = "ledger.sheets.spreadsheet_resolved",
            spreadsheet_name = %name,
            spreadsheet_id = %first.id,
            "resolved spreadsheet by name"
        );
        Ok(first.id)
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str, tail: &[&str]) -> Result<Url, LedgerError> {
        let mut url = Url::parse(&self.endpoints.sheets_base_url).map_err(|error| {
            LedgerError::Rejected(format!("invalid sheets endpoint: {error}"))
        })?;
        url.path_segments_mut()
            .map_err(|_| LedgerError::Rejected("sheets endpoint cannot carry a path".to_owned()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id])
            .extend(tail);
        Ok(url)
    }
}

#[async_trait]
impl OrderLedger for GoogleSheetsLedger {
    fn backend(&self) -> &'static str {
        "sheets"
    }

    async fn append(&self, order: &OrderRecord) -> Result<(), LedgerError> {
        let spreadsheet_id = self.spreadsheet_id().await?;
        let range = format!("{}:append", self.append_range());
        let url = self.spreadsheet_url(spreadsheet_id, &["values", range.as_str()])?;
        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token.expose_secret())
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "majorDimension": "ROWS", "values": [order.row()] }))
            .send()
            .await
            .map_err(append_send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        // Google may have stored the row before failing or timing out.
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Unconfirmed(format!("{status}: {}", excerpt(&body))));
        }
        check_status(response).await?;
        Ok(())
    }

    async fn readiness(&self) -> Result<(), LedgerError> {
        let spreadsheet_id = self.spreadsheet_id().await?;
        let url = self.spreadsheet_url(spreadsheet_id, &[])?;
        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await
            .map_err(transport_error)?;
        let metadata: SpreadsheetMetadata = read_json(response).await?;

        if metadata.sheets.iter().any(|sheet| sheet.properties.title == self.worksheet) {
            Ok(())
        } else {
            Err(LedgerError::Rejected(format!(
                "worksheet `{}` does not exist in spreadsheet {spreadsheet_id}",
                self.worksheet
            )))
        }
    }
}

pub(crate) fn transport_error(error: reqwest::Error) -> LedgerError {
    LedgerError::Transport(error.to_string())
}

/// Only a failed connection proves the row was never sent.
fn append_send_error(error: reqwest::Error) -> LedgerError {
    if error.is_connect() {
        transport_error(error)
    } else {
        LedgerError::Unconfirmed(error.to_string())
    }
}

pub(crate) fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_EXCERPT_CHARS).collect()
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LedgerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{status}: {}", excerpt(&body));
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LedgerError::Auth(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            LedgerError::Transport(detail)
        }
        status if status.is_server_error() => LedgerError::Transport(detail),
        _ => LedgerError::Rejected(detail),
    })
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LedgerError> {
    check_status(response)
        .await?
        .json::<T>()
        .await
        .map_err(|error| LedgerError::Transport(format!("could not decode response: {error}")))
}

#[cfg(test)]
mod tests {
    use super::escape_query_literal;

    #[test]
    fn drive_query_literals_are_escaped() {
        assert_eq!(escape_query_literal("Заказы Бутер"), "Заказы Бутер");
        assert_eq!(escape_query_literal("Bob's \\ sheet"), "Bob\\'s \\\\ sheet");
    }
}
