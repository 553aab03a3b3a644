use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use orderdesk_core::ledger::LedgerError;

use super::{excerpt, transport_error};

pub const SHEETS_SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive.readonly";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Google service-account key as downloaded from the cloud console.
#[derive(Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key_id: Option<String>,
    pub token_uri: String,
    private_key: SecretString,
}

#[derive(Deserialize)]
struct RawServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, LedgerError> {
        let parsed: RawServiceAccountKey = serde_json::from_str(raw).map_err(|error| {
            LedgerError::Auth(format!("service account key is not valid JSON: {error}"))
        })?;

        Ok(Self {
            client_email: parsed.client_email,
            private_key_id: parsed.private_key_id,
            token_uri: parsed.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
            private_key: parsed.private_key.into(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, LedgerError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            LedgerError::Auth(format!(
                "could not read service account key `{}`: {error}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    fn encoding_key(&self) -> Result<EncodingKey, LedgerError> {
        EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes()).map_err(|error| {
            LedgerError::Auth(format!("service account private key is not valid RSA PEM: {error}"))
        })
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

struct CachedToken {
    value: SecretString,
    refresh_at: Instant,
}

/// Exchanges signed service-account assertions for OAuth access tokens and
/// caches each token until shortly before it expires.
pub struct AccessTokenProvider {
    http: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scopes: String,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenProvider {
    pub fn new(
        http: reqwest::Client,
        key: ServiceAccountKey,
        scopes: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        let encoding_key = key.encoding_key()?;
        Ok(Self { http, key, encoding_key, scopes: scopes.into(), cached: Mutex::new(None) })
    }

    pub async fn access_token(&self) -> Result<SecretString, LedgerError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.exchange().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Forgets the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    pub(crate) fn claims(&self, issued_at: i64) -> AssertionClaims {
        AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scopes.clone(),
            aud: self.key.token_uri.clone(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        }
    }

    pub(crate) fn signed_assertion(&self, issued_at: i64) -> Result<String, LedgerError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &self.claims(issued_at), &self.encoding_key)
            .map_err(|error| LedgerError::Auth(format!("could not sign token assertion: {error}")))
    }

    async fn exchange(&self) -> Result<CachedToken, LedgerError> {
        let assertion = self.signed_assertion(Utc::now().timestamp())?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Auth(format!(
                "token endpoint returned {status}: {}",
                excerpt(&body)
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|error| {
            LedgerError::Auth(format!("token response could not be decoded: {error}"))
        })?;
        debug!(
            event_name = "ledger.sheets.token_refreshed",
            client_email = %self.key.client_email,
            expires_in = token.expires_in,
            "obtained access token"
        );

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        Ok(CachedToken { value: token.access_token.into(), refresh_at: Instant::now() + lifetime })
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{decode_header, Algorithm};

    use orderdesk_core::ledger::LedgerError;

    use super::{AccessTokenProvider, ServiceAccountKey, SHEETS_SCOPES};

    const FIXTURE: &str = include_str!("../../tests/fixtures/service_account.json");

    fn provider() -> AccessTokenProvider {
        let key = ServiceAccountKey::from_json(FIXTURE).expect("fixture key parses");
        AccessTokenProvider::new(reqwest::Client::new(), key, SHEETS_SCOPES).expect("rsa key")
    }

    #[test]
    fn key_debug_output_redacts_private_key() {
        let key = ServiceAccountKey::from_json(FIXTURE).expect("fixture key parses");
        let debug = format!("{key:?}");

        assert!(debug.contains("orderdesk-test@orderdesk-test.iam.gserviceaccount.com"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn malformed_key_is_an_auth_error() {
        let result = ServiceAccountKey::from_json("{\"client_email\": 1}");
        assert!(matches!(result, Err(LedgerError::Auth(_))));

        let key = ServiceAccountKey::from_json(
            r#"{"client_email":"svc@example.com","private_key":"not a pem"}"#,
        )
        .expect("json shape is valid");
        let provider = AccessTokenProvider::new(reqwest::Client::new(), key, SHEETS_SCOPES);
        assert!(matches!(provider, Err(LedgerError::Auth(_))));
    }

    #[test]
    fn missing_token_uri_defaults_to_google() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email":"svc@example.com","private_key":"pem"}"#,
        )
        .expect("json shape is valid");
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(key.private_key_id, None);
    }

    #[test]
    fn assertion_is_rs256_signed_with_key_id() {
        let provider = provider();
        let assertion = provider.signed_assertion(1_700_000_000).expect("signed");

        let header = decode_header(&assertion).expect("header decodes");
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("test-key-1"));
        assert_eq!(assertion.split('.').count(), 3);
    }

    #[test]
    fn claims_cover_one_hour_for_the_token_endpoint() {
        let claims = provider().claims(1_700_000_000);

        assert_eq!(claims.iss, "orderdesk-test@orderdesk-test.iam.gserviceaccount.com");
        assert_eq!(claims.aud, "https://oauth2.googleapis.com/token");
        assert_eq!(claims.scope, SHEETS_SCOPES);
        assert_eq!(claims.exp - claims.iat, 3600);
    }
}
