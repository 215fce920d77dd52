//! Splunk storage/passwords client
//!
//! Lists the app's stored passwords over the management REST API.

use super::{SecureStore, StoreEntry, StoreError, StoreSession};
use crate::config::SplunkConfig;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Secure store backed by Splunk's `storage/passwords` endpoint
#[derive(Debug, Clone)]
pub struct SplunkPasswordStore {
    app: String,
    owner: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct PasswordsResponse {
    #[serde(default)]
    entry: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    content: HashMap<String, serde_json::Value>,
}

impl From<RawEntry> for StoreEntry {
    fn from(raw: RawEntry) -> Self {
        // ACL blocks and numeric flags are not needed.
        let content = raw
            .content
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect();

        StoreEntry {
            name: raw.name,
            id: raw.id,
            content,
        }
    }
}

impl SplunkPasswordStore {
    pub fn new(config: &SplunkConfig) -> Self {
        Self {
            app: config.app.clone(),
            owner: config.owner.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// URL of the passwords collection for this app and owner
    pub fn endpoint(&self, management_url: &str) -> String {
        format!(
            "{}/servicesNS/{}/{}/storage/passwords",
            management_url.trim_end_matches('/'),
            urlencoding::encode(&self.owner),
            urlencoding::encode(&self.app)
        )
    }
}

/// Parse a JSON `output_mode` response into store entries
fn parse_entries(body: &str) -> Result<Vec<StoreEntry>, StoreError> {
    let response: PasswordsResponse =
        serde_json::from_str(body).map_err(|e| StoreError::Parse(e.to_string()))?;
    Ok(response.entry.into_iter().map(StoreEntry::from).collect())
}

#[async_trait]
impl SecureStore for SplunkPasswordStore {
    async fn list_entries(&self, session: &StoreSession) -> Result<Vec<StoreEntry>, StoreError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!session.verify_tls)
            .build()?;

        let url = self.endpoint(&session.management_url);
        tracing::debug!(url = %url, verify_tls = session.verify_tls, "Querying stored passwords");

        let response = client
            .get(&url)
            .query(&[("output_mode", "json"), ("count", "0")])
            .header(AUTHORIZATION, format!("Splunk {}", session.session_key))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_entries(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let store = SplunkPasswordStore::new(&SplunkConfig::default());
        assert_eq!(
            store.endpoint("https://127.0.0.1:8089/"),
            "https://127.0.0.1:8089/servicesNS/nobody/TA-GoogleFitness/storage/passwords"
        );
    }

    #[test]
    fn test_parse_entries_keeps_string_content() {
        let body = r#"{
            "links": {},
            "entry": [
                {
                    "name": "FitBit:alice:",
                    "id": "https://127.0.0.1:8089/servicesNS/nobody/TA-GoogleFitness/storage/passwords/FitBit%3Aalice%3A",
                    "content": {
                        "realm": "FitBit",
                        "username": "alice",
                        "clear_password": "{\"access_token\":\"a\"}",
                        "eai:acl": {"app": "TA-GoogleFitness"},
                        "disabled": false
                    }
                },
                { "name": "bare" }
            ]
        }"#;

        let entries = parse_entries(body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].field("realm"), Some("FitBit"));
        assert_eq!(entries[0].field("clear_password"), Some("{\"access_token\":\"a\"}"));
        assert!(entries[0].field("eai:acl").is_none());
        assert!(entries[0].field("disabled").is_none());
        assert!(entries[1].content.is_empty());
    }

    #[test]
    fn test_parse_entries_rejects_garbage() {
        assert!(matches!(parse_entries("<html>"), Err(StoreError::Parse(_))));
    }
}
