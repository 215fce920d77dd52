//! Authenticated provider client
//!
//! Wraps a reqwest client together with one user's token and the provider
//! application's credentials. A refreshed access token only lives in this
//! client; the stored credential is left untouched.

use super::{FetchError, Provider};
use crate::config::ProviderEndpoint;
use crate::credentials::{AppCredential, OAuthToken, UserCredential};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Refresh tokens expiring within this margin
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Seconds to wait when a 429 carries no usable Retry-After
const DEFAULT_RETRY_AFTER: u64 = 3600;

/// HTTP client authenticated as one stored credential
pub struct ProviderClient {
    http: Client,
    provider: Provider,
    credential: String,
    token: OAuthToken,
    app: AppCredential,
    endpoint: ProviderEndpoint,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
}

impl ProviderClient {
    /// Build a client for `credential`
    pub fn new(
        provider: Provider,
        credential: &UserCredential,
        app: &AppCredential,
        endpoint: ProviderEndpoint,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(endpoint.request_timeout_secs))
            .user_agent(concat!("fitness-input/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            provider,
            credential: credential.name.clone(),
            token: credential.token.clone(),
            app: app.clone(),
            endpoint,
        })
    }

    /// Name of the stored credential this client acts for
    pub fn credential_name(&self) -> &str {
        &self.credential
    }

    /// Current working copy of the token
    pub fn token(&self) -> &OAuthToken {
        &self.token
    }

    /// Absolute URL for an API path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.api_base.trim_end_matches('/'), path)
    }

    /// Refresh the access token if it is about to expire
    pub async fn refresh_token_if_needed(&mut self) -> Result<(), FetchError> {
        if !self
            .token
            .expires_within(Utc::now(), Duration::minutes(REFRESH_MARGIN_MINUTES))
        {
            return Ok(());
        }

        if self.token.refresh_token.is_empty() {
            tracing::warn!(
                credential = %self.credential,
                "Access token expired and no refresh token is stored"
            );
            return Ok(());
        }

        tracing::debug!(credential = %self.credential, "Refreshing access token");

        let request = match self.provider {
            // Google expects the client credentials in the form body
            Provider::GoogleFitness => self.http.post(&self.endpoint.token_url).form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.token.refresh_token.as_str()),
                ("client_id", self.app.client_id.as_str()),
                ("client_secret", self.app.client_secret.as_str()),
            ]),
            Provider::FitBit | Provider::Microsoft => self
                .http
                .post(&self.endpoint.token_url)
                .basic_auth(&self.app.client_id, Some(&self.app.client_secret))
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", self.token.refresh_token.as_str()),
                ]),
        };

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::AuthFailed(format!("{}: {}", status, text)));
        }

        let refreshed: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::ParseError(e.to_string()))?;

        self.token.access_token = refreshed.access_token;
        if let Some(refresh_token) = refreshed.refresh_token {
            self.token.refresh_token = refresh_token;
        }
        if let Some(token_type) = refreshed.token_type {
            self.token.token_type = token_type;
        }
        self.token.expires_at = refreshed
            .expires_in
            .map(|secs| expiry_after(Utc::now(), secs))
            .transpose()?;

        Ok(())
    }

    /// GET `url` with the bearer token and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&mut self, url: &str) -> Result<T, FetchError> {
        self.refresh_token_if_needed().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token.access_token)
            .send()
            .await?;

        let response = check_status(self.provider, response)?;

        response
            .json()
            .await
            .map_err(|e| FetchError::ParseError(e.to_string()))
    }
}

/// Instant `secs` seconds after `now`, rejecting out-of-range lifetimes
fn expiry_after(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, FetchError> {
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| FetchError::ParseError(format!("token expires_in out of range: {}", secs)))
}

/// Map provider status codes onto fetch errors
fn check_status(provider: Provider, response: Response) -> Result<Response, FetchError> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(FetchError::Unauthorized(provider));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(FetchError::RateLimited(retry_after));
    }

    if !status.is_success() {
        return Err(FetchError::ApiError(format!(
            "{} returned {} for {}",
            provider,
            status,
            response.url()
        )));
    }

    Ok(response)
}
