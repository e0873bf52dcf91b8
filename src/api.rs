use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{NetworkConfig, ProviderConfig};

/// Errors raised while fetching the outage schedule.
///
/// All of them are treated as transient by the schedule loop: the cycle
/// is abandoned and retried on the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to schedule provider failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("schedule provider returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("group '{0}' not found in provider response")]
    UnknownGroup(String),
}

/// Recognized slot types. Anything else is dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// No outage planned; power is expected to stay on.
    NotPlanned,
    /// A confirmed planned outage.
    Definite,
}

impl SlotKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NotPlanned" => Some(SlotKind::NotPlanned),
            "Definite" => Some(SlotKind::Definite),
            _ => None,
        }
    }

    /// Whether power is expected to be on during a slot of this kind.
    pub fn powered(self) -> bool {
        matches!(self, SlotKind::NotPlanned)
    }
}

/// One raw schedule slot as published by the provider.
///
/// `start` and `end` are minutes since local midnight of the slot's day;
/// 1440 marks end of day. `end` is optional: when the provider omits it,
/// the slot runs until the next slot starts.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSlot {
    pub start: u32,
    pub end: Option<u32>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Slot list for a single civil day.
#[derive(Debug, Clone, Deserialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    #[serde(default)]
    pub slots: Vec<RawSlot>,
}

/// Schedule payload for one subscriber group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSchedule {
    pub today: Option<DaySchedule>,
    pub tomorrow: Option<DaySchedule>,
    /// Freshness marker; the provider bumps it when it republishes.
    pub updated_on: DateTime<Utc>,
}

impl GroupSchedule {
    /// The days present in the payload, today first.
    pub fn days(&self) -> impl Iterator<Item = &DaySchedule> {
        self.today.iter().chain(self.tomorrow.iter())
    }
}

/// Client for the planned-outages endpoint of the schedule provider.
#[derive(Clone, Debug)]
pub struct ScheduleApiClient {
    client: reqwest::Client,
    base_url: String,
    region_id: u32,
    dso_id: u32,
    group_id: String,
}

impl ScheduleApiClient {
    /// Create a new API client with configurable timeouts.
    pub fn new(provider: &ProviderConfig, network: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            region_id: provider.region_id,
            dso_id: provider.dso_id,
            group_id: provider.group_id.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/regions/{}/dsos/{}/planned-outages",
            self.base_url, self.region_id, self.dso_id
        )
    }

    /// Fetch the current schedule for the configured subscriber group.
    ///
    /// The response is an object keyed by group id; a missing group or an
    /// undeserialisable body fails the fetch rather than limping on with
    /// partial data.
    pub async fn fetch_schedule(&self) -> Result<GroupSchedule, FetchError> {
        let response = self.client.get(self.endpoint()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let mut groups = response.json::<HashMap<String, GroupSchedule>>().await?;

        groups
            .remove(&self.group_id)
            .ok_or_else(|| FetchError::UnknownGroup(self.group_id.clone()))
    }
}
