//! Fitbit strategy
//!
//! Fitbit exposes daily summaries, so the window is walked one calendar day
//! at a time (UTC), including the day the window ends on:
//! - Activity summary (steps, calories, active minutes)
//! - Sleep summary

use super::{FetchError, FetchWindow, FitnessReader, Provider, ProviderClient};
use crate::output::EventSink;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

/// Reads Fitbit daily summaries for one window
#[derive(Debug, Clone, Copy)]
pub struct FitbitReader {
    window: FetchWindow,
}

#[derive(Deserialize)]
struct ActivitiesResponse {
    summary: ActivitySummary,
}

#[derive(Deserialize)]
struct ActivitySummary {
    steps: u64,
    #[serde(rename = "caloriesOut")]
    calories_out: u64,
    #[serde(rename = "veryActiveMinutes")]
    very_active_minutes: Option<u64>,
    #[serde(rename = "fairlyActiveMinutes")]
    fairly_active_minutes: Option<u64>,
}

#[derive(Deserialize)]
struct SleepResponse {
    summary: SleepSummary,
}

#[derive(Deserialize)]
struct SleepSummary {
    #[serde(rename = "totalMinutesAsleep")]
    total_minutes_asleep: u64,
}

impl FitbitReader {
    pub fn new(window: FetchWindow) -> Self {
        Self { window }
    }

    /// Calendar days touched by the window
    fn days(&self) -> Vec<NaiveDate> {
        let last = self.window.end().date_naive();
        self.window
            .start()
            .date_naive()
            .iter_days()
            .take_while(|day| *day <= last)
            .collect()
    }

    async fn fetch_activities(
        &self,
        client: &mut ProviderClient,
        sink: &mut dyn EventSink,
        date: &str,
    ) -> Result<(), FetchError> {
        let url = client.api_url(&format!("/1/user/-/activities/date/{}.json", date));
        let data: ActivitiesResponse = client.get_json(&url).await?;

        let active_minutes = data.summary.very_active_minutes.unwrap_or(0)
            + data.summary.fairly_active_minutes.unwrap_or(0);

        sink.emit(&json!({
            "provider": Provider::FitBit.as_str(),
            "credential": client.credential_name(),
            "kind": "activity",
            "date": date,
            "steps": data.summary.steps,
            "calories_out": data.summary.calories_out,
            "active_minutes": active_minutes,
        }))?;

        Ok(())
    }

    /// Returns false when the day has no recorded sleep
    async fn fetch_sleep(
        &self,
        client: &mut ProviderClient,
        sink: &mut dyn EventSink,
        date: &str,
    ) -> Result<bool, FetchError> {
        let url = client.api_url(&format!("/1.2/user/-/sleep/date/{}.json", date));
        let data: SleepResponse = client.get_json(&url).await?;

        if data.summary.total_minutes_asleep == 0 {
            return Ok(false);
        }

        sink.emit(&json!({
            "provider": Provider::FitBit.as_str(),
            "credential": client.credential_name(),
            "kind": "sleep",
            "date": date,
            "minutes_asleep": data.summary.total_minutes_asleep,
            "sleep_hours": data.summary.total_minutes_asleep as f64 / 60.0,
        }))?;

        Ok(true)
    }
}

#[async_trait]
impl FitnessReader for FitbitReader {
    fn provider(&self) -> Provider {
        Provider::FitBit
    }

    fn window(&self) -> FetchWindow {
        self.window
    }

    async fn get_data(
        &self,
        client: &mut ProviderClient,
        sink: &mut dyn EventSink,
    ) -> Result<DateTime<Utc>, FetchError> {
        let days = self.days();
        let mut sleep_days = 0usize;

        for day in &days {
            let date = day.format("%Y-%m-%d").to_string();
            self.fetch_activities(client, sink, &date).await?;
            if self.fetch_sleep(client, sink, &date).await? {
                sleep_days += 1;
            }
        }

        tracing::info!(days = days.len(), sleep_days, "Fitbit summaries written");
        Ok(self.window.end())
    }
}
