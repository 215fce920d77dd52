//! Fitness Providers
//!
//! Closed set of fitness data providers and the strategies that fetch from
//! them:
//! - Google Fitness (data sources and datasets)
//! - Fitbit (daily activity and sleep summaries)
//! - Microsoft (accepted by configuration, no fetch strategy yet)
//!
//! A strategy is bound to one [`FetchWindow`] and pulls data through an
//! authenticated [`ProviderClient`].

mod client;
mod fitbit;
mod google;

pub use client::ProviderClient;
pub use fitbit::FitbitReader;
pub use google::GoogleFitnessReader;

use crate::output::EventSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fitness data provider known to the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    GoogleFitness,
    FitBit,
    Microsoft,
}

impl Provider {
    /// Every provider accepted by configuration validation
    pub const ALL: [Provider; 3] = [Provider::GoogleFitness, Provider::FitBit, Provider::Microsoft];

    /// Name used in configuration and as the `realm` of stored credentials
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoogleFitness => "GoogleFitness",
            Provider::FitBit => "FitBit",
            Provider::Microsoft => "Microsoft",
        }
    }

    /// Substring identifying the application credential entry in the secure store
    pub fn app_marker(&self) -> &'static str {
        match self {
            Provider::GoogleFitness => "apps.googleusercontent.com",
            Provider::FitBit => "api.fitbit.com",
            Provider::Microsoft => "login.microsoftonline.com",
        }
    }

    pub(crate) fn default_api_base(&self) -> &'static str {
        match self {
            Provider::GoogleFitness => "https://www.googleapis.com",
            Provider::FitBit => "https://api.fitbit.com",
            Provider::Microsoft => "https://api.microsofthealth.net",
        }
    }

    pub(crate) fn default_token_url(&self) -> &'static str {
        match self {
            Provider::GoogleFitness => "https://oauth2.googleapis.com/token",
            Provider::FitBit => "https://api.fitbit.com/oauth2/token",
            Provider::Microsoft => "https://login.microsoftonline.com/common/oauth2/v2.0/token",
        }
    }

    /// Comma-separated list of accepted names, for error messages and the scheme
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|p| format!("'{}'", p.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider name that is not part of [`Provider::ALL`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// Half-open time range `[start, end)` handed to a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl FetchWindow {
    /// Create a window; a start later than the end is clamped to the end
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start > end {
            tracing::warn!(%start, %end, "Checkpoint is ahead of the clock, clamping window start");
            return Self { start: end, end };
        }
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A fetch strategy bound to one window
#[async_trait]
pub trait FitnessReader: Send + Sync {
    /// Provider this strategy reads from
    fn provider(&self) -> Provider;

    /// Window the strategy was resolved for
    fn window(&self) -> FetchWindow;

    /// Fetch data for the bound window, write records to `sink` and return
    /// the timestamp to checkpoint going forward
    async fn get_data(
        &self,
        client: &mut ProviderClient,
        sink: &mut dyn EventSink,
    ) -> Result<DateTime<Utc>, FetchError>;
}

/// Maps a provider to the strategy that reads from it
pub trait StrategyResolver: Send + Sync {
    fn resolve(
        &self,
        provider: Provider,
        window: FetchWindow,
    ) -> Result<Box<dyn FitnessReader>, StrategyError>;
}

/// Concrete strategies, one variant per provider with an implementation
pub enum Strategy {
    GoogleFitness(GoogleFitnessReader),
    FitBit(FitbitReader),
}

#[async_trait]
impl FitnessReader for Strategy {
    fn provider(&self) -> Provider {
        match self {
            Strategy::GoogleFitness(r) => r.provider(),
            Strategy::FitBit(r) => r.provider(),
        }
    }

    fn window(&self) -> FetchWindow {
        match self {
            Strategy::GoogleFitness(r) => r.window(),
            Strategy::FitBit(r) => r.window(),
        }
    }

    async fn get_data(
        &self,
        client: &mut ProviderClient,
        sink: &mut dyn EventSink,
    ) -> Result<DateTime<Utc>, FetchError> {
        match self {
            Strategy::GoogleFitness(r) => r.get_data(client, sink).await,
            Strategy::FitBit(r) => r.get_data(client, sink).await,
        }
    }
}

/// Static provider → strategy table
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRegistry;

impl StaticRegistry {
    /// Look up the strategy for `provider`, bound to `window`
    pub fn strategy_for(
        &self,
        provider: Provider,
        window: FetchWindow,
    ) -> Result<Strategy, StrategyError> {
        match provider {
            Provider::GoogleFitness => Ok(Strategy::GoogleFitness(GoogleFitnessReader::new(window))),
            Provider::FitBit => Ok(Strategy::FitBit(FitbitReader::new(window))),
            Provider::Microsoft => Err(StrategyError::NotRegistered(provider)),
        }
    }
}

impl StrategyResolver for StaticRegistry {
    fn resolve(
        &self,
        provider: Provider,
        window: FetchWindow,
    ) -> Result<Box<dyn FitnessReader>, StrategyError> {
        Ok(Box::new(self.strategy_for(provider, window)?))
    }
}

/// Strategy lookup failures
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("Unsupported reader requested: {0}")]
    NotRegistered(Provider),
}

/// Errors that can occur while fetching provider data
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token refresh failed: {0}")]
    AuthFailed(String),

    #[error("{0} rejected the access token")]
    Unauthorized(Provider),

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Failed to write event: {0}")]
    Output(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_provider_names_round_trip() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert_eq!(
            "fitbit".parse::<Provider>(),
            Err(UnknownProvider("fitbit".to_string()))
        );
    }

    #[test]
    fn test_window_clamps_future_start() {
        let end = Utc::now();
        let window = FetchWindow::new(end + Duration::hours(3), end);
        assert_eq!(window.start(), end);
        assert!(window.is_empty());
    }

    #[test]
    fn test_registry_table() {
        let registry = StaticRegistry;
        let now = Utc::now();
        let window = FetchWindow::new(now - Duration::hours(1), now);

        let google = registry.resolve(Provider::GoogleFitness, window).unwrap();
        assert_eq!(google.provider(), Provider::GoogleFitness);
        assert_eq!(google.window(), window);

        let fitbit = registry.resolve(Provider::FitBit, window).unwrap();
        assert_eq!(fitbit.provider(), Provider::FitBit);

        assert!(matches!(
            registry.resolve(Provider::Microsoft, window),
            Err(StrategyError::NotRegistered(Provider::Microsoft))
        ));
    }
}
