//! Stored Credentials
//!
//! Resolves OAuth credentials from the host's secure store:
//! - the provider application's client id and secret
//! - every user token whose `realm` names the configured provider
//!
//! The store is only read. Tokens are never written back or persisted
//! locally.

mod splunk;

pub use splunk::SplunkPasswordStore;

use crate::providers::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// One entry of the secure store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreEntry {
    /// Entry name, `realm:username:` in Splunk's storage/passwords
    pub name: String,
    /// Full identifier of the entry
    pub id: String,
    /// String-valued attributes (`realm`, `username`, `clear_password`, ...)
    pub content: HashMap<String, String>,
}

impl StoreEntry {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.content.get(key).map(String::as_str)
    }
}

/// Session used to query the secure store
#[derive(Clone)]
pub struct StoreSession {
    pub management_url: String,
    pub session_key: String,
    /// Enforce TLS certificate validation
    pub verify_tls: bool,
}

impl fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSession")
            .field("management_url", &self.management_url)
            .field("session_key", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// Key/value secure store holding the connector's credentials
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// List every entry owned by the connector's app
    async fn list_entries(&self, session: &StoreSession) -> Result<Vec<StoreEntry>, StoreError>;
}

/// Errors raised by a secure store query
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Parse(String),
}

/// Errors that can occur while resolving credentials
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Unable to retrieve password entries: {0}")]
    Store(#[from] StoreError),

    #[error("No application credential stored for {provider} (expected an entry containing '{}')", .provider.app_marker())]
    MissingAppCredential { provider: Provider },

    #[error("Failed to decode stored token {entry}: {reason}")]
    Decode { entry: String, reason: String },
}

/// OAuth client id and secret of the provider application
#[derive(Clone, PartialEq, Eq)]
pub struct AppCredential {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for AppCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// An OAuth token for one user of one provider
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// `None` when the stored token carries no expiry
    pub expires_at: Option<DateTime<Utc>>,
    pub realm: Provider,
}

impl OAuthToken {
    /// True when the token expires within `margin` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at.map(|t| t <= now + margin).unwrap_or(false)
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("realm", &self.realm)
            .finish()
    }
}

/// A stored user token together with the entry it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredential {
    /// Store entry name; identifies the credential across runs
    pub name: String,
    pub token: OAuthToken,
}

/// Outcome of resolving user credentials
#[derive(Debug, Default)]
pub struct ResolvedCredentials {
    pub credentials: Vec<UserCredential>,
    /// Entries tagged for the provider whose token could not be decoded
    pub rejected: Vec<CredentialError>,
}

/// Token payload stored in `clear_password`
#[derive(Deserialize)]
struct StoredToken {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_at: String,
}

const SECRET_FIELD: &str = "clear_password";
const USERNAME_FIELD: &str = "username";
const REALM_FIELD: &str = "realm";

/// Reads app and user credentials from a [`SecureStore`]
pub struct CredentialRepository<S> {
    store: S,
}

impl<S: SecureStore> CredentialRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolve the application credential for `provider`
    ///
    /// Returns `Ok(None)` when no entry carries the provider's app marker.
    pub async fn app_credential(
        &self,
        provider: Provider,
        session: &StoreSession,
    ) -> Result<Option<AppCredential>, CredentialError> {
        let entries = self.store.list_entries(session).await?;

        // Last match wins when several entries carry the marker.
        let credential = entries
            .iter()
            .filter(|entry| is_app_entry(entry, provider))
            .map(|entry| AppCredential {
                client_id: entry.field(USERNAME_FIELD).unwrap_or_default().to_string(),
                client_secret: entry.field(SECRET_FIELD).unwrap_or_default().to_string(),
            })
            .last();

        Ok(credential)
    }

    /// Resolve every user token whose realm is `provider`
    ///
    /// An entry whose token payload cannot be decoded is reported in
    /// [`ResolvedCredentials::rejected`] without affecting the others.
    pub async fn user_credentials(
        &self,
        provider: Provider,
        session: &StoreSession,
    ) -> Result<ResolvedCredentials, CredentialError> {
        let entries = self.store.list_entries(session).await?;
        let mut resolved = ResolvedCredentials::default();

        for entry in &entries {
            if entry.field(REALM_FIELD) != Some(provider.as_str()) || is_app_entry(entry, provider) {
                continue;
            }

            match decode_token(entry, provider) {
                Ok(token) => resolved.credentials.push(UserCredential {
                    name: entry.name.clone(),
                    token,
                }),
                Err(e) => resolved.rejected.push(e),
            }
        }

        tracing::debug!(
            provider = %provider,
            entries = entries.len(),
            credentials = resolved.credentials.len(),
            rejected = resolved.rejected.len(),
            "Resolved user credentials"
        );

        Ok(resolved)
    }
}

fn is_app_entry(entry: &StoreEntry, provider: Provider) -> bool {
    entry.id.contains(provider.app_marker()) || entry.name.contains(provider.app_marker())
}

fn decode_token(entry: &StoreEntry, provider: Provider) -> Result<OAuthToken, CredentialError> {
    let decode_error = |reason: String| CredentialError::Decode {
        entry: entry.name.clone(),
        reason,
    };

    let raw = entry
        .field(SECRET_FIELD)
        .ok_or_else(|| decode_error(format!("missing {} attribute", SECRET_FIELD)))?;

    let stored: StoredToken =
        serde_json::from_str(raw).map_err(|e| decode_error(e.to_string()))?;

    if stored.access_token.is_empty() && stored.refresh_token.is_empty() {
        return Err(decode_error(
            "token carries neither an access nor a refresh token".to_string(),
        ));
    }

    let expires_at = parse_expiry(&stored.expires_at).map_err(decode_error)?;

    Ok(OAuthToken {
        access_token: stored.access_token,
        refresh_token: stored.refresh_token,
        token_type: stored.token_type,
        expires_at,
        realm: provider,
    })
}

/// Parse the string-encoded expiry of a stored token
///
/// Accepts RFC 3339 and the `2016-06-21 07:59:23.44961918 -0700 PDT` layout
/// written by the Go tooling (zone abbreviation and monotonic clock reading
/// are ignored). Empty strings and Go's zero time mean "no expiry".
pub(crate) fn parse_expiry(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("0001-01-01 00:00:00") {
        return Ok(None);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }

    let without_monotonic = raw.split(" m=").next().unwrap_or(raw);
    let mut parts = without_monotonic.split_whitespace();
    if let (Some(date), Some(time), Some(offset)) = (parts.next(), parts.next(), parts.next()) {
        let joined = format!("{} {} {}", date, time, offset);
        if let Ok(dt) = DateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S%.f %z") {
            return Ok(Some(dt.with_timezone(&Utc)));
        }
    }

    Err(format!("unrecognized expiry timestamp '{}'", raw))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory store that counts queries
    pub(crate) struct FakeStore {
        pub entries: Vec<StoreEntry>,
        pub fail: bool,
        pub queries: Arc<AtomicUsize>,
    }

    impl FakeStore {
        pub fn new(entries: Vec<StoreEntry>) -> Self {
            Self {
                entries,
                fail: false,
                queries: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl SecureStore for FakeStore {
        async fn list_entries(&self, _session: &StoreSession) -> Result<Vec<StoreEntry>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Status {
                    status: 503,
                    body: "splunkd unavailable".to_string(),
                });
            }
            Ok(self.entries.clone())
        }
    }

    pub(crate) fn entry(name: &str, fields: &[(&str, &str)]) -> StoreEntry {
        StoreEntry {
            name: name.to_string(),
            id: format!(
                "https://127.0.0.1:8089/servicesNS/nobody/TA-GoogleFitness/storage/passwords/{}",
                name
            ),
            content: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub(crate) fn token_entry(realm: &str, user: &str, access_token: &str) -> StoreEntry {
        let payload = serde_json::json!({
            "access_token": access_token,
            "refresh_token": format!("refresh-{}", user),
            "token_type": "Bearer",
            "expires_at": "2099-01-01T00:00:00Z",
        })
        .to_string();
        entry(
            &format!("{}:{}:", realm, user),
            &[("realm", realm), ("username", user), ("clear_password", payload.as_str())],
        )
    }

    pub(crate) fn app_entry(provider: Provider, client_id: &str, secret: &str) -> StoreEntry {
        entry(
            &format!("{}:{}:", provider.app_marker(), client_id),
            &[
                ("realm", provider.app_marker()),
                ("username", client_id),
                ("clear_password", secret),
            ],
        )
    }

    pub(crate) fn session() -> StoreSession {
        StoreSession {
            management_url: "https://127.0.0.1:8089".to_string(),
            session_key: "session".to_string(),
            verify_tls: false,
        }
    }

    #[tokio::test]
    async fn test_app_credential_by_marker() {
        let repo = CredentialRepository::new(FakeStore::new(vec![
            token_entry("GoogleFitness", "alice", "a"),
            entry(
                ":123-abc.apps.googleusercontent.com:",
                &[
                    ("username", "123-abc.apps.googleusercontent.com"),
                    ("clear_password", "s3cret"),
                ],
            ),
        ]));

        let app = repo
            .app_credential(Provider::GoogleFitness, &session())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(app.client_id, "123-abc.apps.googleusercontent.com");
        assert_eq!(app.client_secret, "s3cret");
    }

    #[tokio::test]
    async fn test_missing_app_credential_is_not_an_error() {
        let repo = CredentialRepository::new(FakeStore::new(vec![token_entry("FitBit", "bob", "b")]));
        let app = repo.app_credential(Provider::FitBit, &session()).await.unwrap();
        assert!(app.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let repo = CredentialRepository::new(FakeStore::failing());
        let err = repo
            .user_credentials(Provider::FitBit, &session())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Store(_)));
    }

    #[tokio::test]
    async fn test_realm_filter() {
        let repo = CredentialRepository::new(FakeStore::new(vec![
            token_entry("FitBit", "alice", "a"),
            token_entry("GoogleFitness", "bob", "b"),
            token_entry("fitbit", "carol", "c"),
            token_entry("FitBit", "dave", "d"),
            app_entry(Provider::FitBit, "22ABCD", "secret"),
            entry("no-realm", &[("clear_password", "{}")]),
        ]));

        let resolved = repo.user_credentials(Provider::FitBit, &session()).await.unwrap();
        let names: Vec<&str> = resolved.credentials.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["FitBit:alice:", "FitBit:dave:"]);
        assert!(resolved
            .credentials
            .iter()
            .all(|c| c.token.realm == Provider::FitBit));
        assert!(resolved.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_bad_payload_rejects_only_that_entry() {
        let repo = CredentialRepository::new(FakeStore::new(vec![
            token_entry("FitBit", "alice", "a"),
            entry(
                "FitBit:broken:",
                &[("realm", "FitBit"), ("clear_password", "not json")],
            ),
            entry("FitBit:empty:", &[("realm", "FitBit")]),
        ]));

        let resolved = repo.user_credentials(Provider::FitBit, &session()).await.unwrap();
        assert_eq!(resolved.credentials.len(), 1);
        assert_eq!(resolved.rejected.len(), 2);
        assert!(resolved
            .rejected
            .iter()
            .all(|e| matches!(e, CredentialError::Decode { .. })));
    }

    #[test]
    fn test_decoded_token_fields() {
        let token = decode_token(&token_entry("FitBit", "alice", "tok"), Provider::FitBit).unwrap();
        assert_eq!(token.access_token, "tok");
        assert_eq!(token.refresh_token, "refresh-alice");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(
            token.expires_at,
            Some(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_go_time_layout() {
        let parsed = parse_expiry("2016-06-21 07:59:23.44961918 -0700 PDT").unwrap().unwrap();
        let expected = Utc.with_ymd_and_hms(2016, 6, 21, 14, 59, 23).unwrap()
            + chrono::Duration::nanoseconds(449_619_180);
        assert_eq!(parsed, expected);

        let monotonic = parse_expiry("2016-06-21 07:59:23 -0700 PDT m=+3600.000000001").unwrap();
        assert_eq!(
            monotonic,
            Some(Utc.with_ymd_and_hms(2016, 6, 21, 14, 59, 23).unwrap())
        );
    }

    #[test]
    fn test_parse_expiry_edge_cases() {
        assert_eq!(parse_expiry("").unwrap(), None);
        assert_eq!(parse_expiry("0001-01-01 00:00:00 +0000 UTC").unwrap(), None);
        assert!(parse_expiry("next tuesday").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = decode_token(&token_entry("FitBit", "alice", "very-secret"), Provider::FitBit).unwrap();
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("refresh-alice"));
    }
}
