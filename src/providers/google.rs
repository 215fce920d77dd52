//! Google Fitness strategy
//!
//! Lists the user's data sources, then pulls one dataset per source covering
//! the fetch window. Dataset ids are `{startNanos}-{endNanos}`.

use super::{FetchError, FetchWindow, FitnessReader, Provider, ProviderClient};
use crate::output::EventSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

const DATA_SOURCES_PATH: &str = "/fitness/v1/users/me/dataSources";

/// Reads Google Fitness datasets for one window
#[derive(Debug, Clone, Copy)]
pub struct GoogleFitnessReader {
    window: FetchWindow,
}

#[derive(Debug, Deserialize)]
struct DataSourceList {
    #[serde(rename = "dataSource", default)]
    data_source: Vec<DataSource>,
}

#[derive(Debug, Deserialize)]
struct DataSource {
    #[serde(rename = "dataStreamId")]
    data_stream_id: String,
    #[serde(rename = "dataStreamName", default)]
    data_stream_name: String,
    #[serde(rename = "dataType", default)]
    data_type: Option<DataType>,
}

#[derive(Debug, Deserialize)]
struct DataType {
    #[serde(default)]
    name: String,
}

impl GoogleFitnessReader {
    pub fn new(window: FetchWindow) -> Self {
        Self { window }
    }

    /// Dataset id for the window, in nanoseconds since the epoch
    fn dataset_id(&self) -> Result<String, FetchError> {
        let nanos = |t: DateTime<Utc>| {
            t.timestamp_nanos_opt()
                .ok_or_else(|| FetchError::ParseError(format!("{} is outside the nanosecond range", t)))
        };
        Ok(format!("{}-{}", nanos(self.window.start())?, nanos(self.window.end())?))
    }
}

/// A dataset without points carries nothing worth indexing
fn has_points(dataset: &Value) -> bool {
    dataset
        .get("point")
        .and_then(Value::as_array)
        .map(|points| !points.is_empty())
        .unwrap_or(false)
}

#[async_trait]
impl FitnessReader for GoogleFitnessReader {
    fn provider(&self) -> Provider {
        Provider::GoogleFitness
    }

    fn window(&self) -> FetchWindow {
        self.window
    }

    async fn get_data(
        &self,
        client: &mut ProviderClient,
        sink: &mut dyn EventSink,
    ) -> Result<DateTime<Utc>, FetchError> {
        if self.window.is_empty() {
            return Ok(self.window.end());
        }

        let dataset_id = self.dataset_id()?;
        let sources_url = client.api_url(DATA_SOURCES_PATH);
        let sources: DataSourceList = client.get_json(&sources_url).await?;

        tracing::debug!(
            sources = sources.data_source.len(),
            dataset = %dataset_id,
            "Listed Google Fitness data sources"
        );

        let mut emitted = 0usize;
        for source in &sources.data_source {
            let url = client.api_url(&format!(
                "{}/{}/datasets/{}",
                DATA_SOURCES_PATH,
                urlencoding::encode(&source.data_stream_id),
                dataset_id
            ));
            let dataset: Value = client.get_json(&url).await?;

            if !has_points(&dataset) {
                continue;
            }

            let data_type = source
                .data_type
                .as_ref()
                .map(|t| t.name.as_str())
                .unwrap_or_default();

            sink.emit(&json!({
                "provider": Provider::GoogleFitness.as_str(),
                "credential": client.credential_name(),
                "dataStreamId": source.data_stream_id,
                "dataStreamName": source.data_stream_name,
                "dataType": data_type,
                "dataset": dataset,
            }))?;
            emitted += 1;
        }

        tracing::info!(events = emitted, "Google Fitness datasets written");
        Ok(self.window.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dataset_id_uses_nanoseconds() {
        let start = Utc.timestamp_opt(1_700_000_000, 5).unwrap();
        let end = Utc.timestamp_opt(1_700_003_600, 0).unwrap();
        let reader = GoogleFitnessReader::new(FetchWindow::new(start, end));

        assert_eq!(
            reader.dataset_id().unwrap(),
            "1700000000000000005-1700003600000000000"
        );
    }

    #[test]
    fn test_dataset_id_out_of_range() {
        let end = Utc.with_ymd_and_hms(2500, 1, 1, 0, 0, 0).unwrap();
        let reader = GoogleFitnessReader::new(FetchWindow::new(end - chrono::Duration::hours(1), end));
        assert!(matches!(reader.dataset_id(), Err(FetchError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_empty_window_makes_no_requests() {
        use crate::config::ProvidersConfig;
        use crate::credentials::{AppCredential, OAuthToken, UserCredential};
        use crate::output::JsonLinesSink;

        let mut endpoint = ProvidersConfig::default().endpoint(Provider::GoogleFitness);
        endpoint.api_base = "http://127.0.0.1:9".to_string();
        let credential = UserCredential {
            name: "GoogleFitness:bob:".to_string(),
            token: OAuthToken {
                access_token: "access".to_string(),
                refresh_token: String::new(),
                token_type: "Bearer".to_string(),
                expires_at: None,
                realm: Provider::GoogleFitness,
            },
        };
        let app = AppCredential {
            client_id: "123.apps.googleusercontent.com".to_string(),
            client_secret: "secret".to_string(),
        };
        let mut client =
            ProviderClient::new(Provider::GoogleFitness, &credential, &app, endpoint).unwrap();
        let mut sink = JsonLinesSink::new(Vec::new());

        let now = Utc::now();
        let reader = GoogleFitnessReader::new(FetchWindow::new(now, now));
        assert_eq!(reader.get_data(&mut client, &mut sink).await.unwrap(), now);
        assert_eq!(sink.events_written(), 0);
    }

    #[test]
    fn test_points_filter() {
        assert!(has_points(&json!({"point": [{"value": []}]})));
        assert!(!has_points(&json!({"point": []})));
        assert!(!has_points(&json!({"dataSourceId": "x"})));
    }

    #[test]
    fn test_data_source_list_shape() {
        let list: DataSourceList = serde_json::from_str(
            r#"{"dataSource": [{
                "dataStreamId": "derived:com.google.step_count.delta:com.google.android.gms:estimated_steps",
                "dataStreamName": "estimated_steps",
                "dataType": {"name": "com.google.step_count.delta", "field": []}
            }]}"#,
        )
        .unwrap();
        assert_eq!(list.data_source.len(), 1);
        assert_eq!(list.data_source[0].data_stream_name, "estimated_steps");

        let empty: DataSourceList = serde_json::from_str("{}").unwrap();
        assert!(empty.data_source.is_empty());
    }
}
