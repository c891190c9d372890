//! Shared price snapshot for the display client
//!
//! The snapshot is rewritten on every run in snapshot mode, including events
//! that failed or had nothing in range, so the client can render negative
//! information too.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::models::{Currency, EventOutcome, OutcomeState, PortalResult, PriceRange, PriceSample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub threshold_low: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub threshold_high: Decimal,
    pub currency: Currency,
    pub events: Vec<SnapshotEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    pub name: String,
    pub portals: BTreeMap<String, SnapshotPortal>,
    pub state: SnapshotState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cheapest_portal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPortal {
    pub label: String,
    pub url: String,
    pub status: PortalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub prices: Vec<SnapshotPrice>,
    /// In-range subset of `prices`
    #[serde(default)]
    pub qualifying: Vec<SnapshotPrice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalStatus {
    Ok,
    Empty,
    Failed,
}

/// Event classification as published. Readers built against an older
/// schema see states they do not know as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    BothInRange,
    OneInRange,
    NoneInRange,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPrice {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: Currency,
}

impl From<&PriceSample> for SnapshotPrice {
    fn from(sample: &PriceSample) -> Self {
        Self {
            amount: sample.amount,
            currency: sample.currency,
        }
    }
}

impl From<&OutcomeState> for SnapshotState {
    fn from(state: &OutcomeState) -> Self {
        match state {
            OutcomeState::BothInRange => Self::BothInRange,
            OutcomeState::OneInRange(_) => Self::OneInRange,
            OutcomeState::NoneInRange => Self::NoneInRange,
            OutcomeState::Failed(_) => Self::Failed,
        }
    }
}

impl Snapshot {
    pub fn from_outcomes(
        outcomes: &[EventOutcome],
        range: PriceRange,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut events: Vec<SnapshotEvent> = outcomes.iter().map(SnapshotEvent::from).collect();
        events.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            generated_at,
            threshold_low: range.low,
            threshold_high: range.high,
            currency: Currency::Eur,
            events,
        }
    }
}

impl From<&EventOutcome> for SnapshotEvent {
    fn from(outcome: &EventOutcome) -> Self {
        let portals = outcome
            .event
            .portals
            .iter()
            .map(|target| {
                let result = outcome.results.get(&target.portal);
                let (status, reason) = match result {
                    Some(PortalResult::Ok(_)) => (PortalStatus::Ok, None),
                    Some(PortalResult::Empty) => (PortalStatus::Empty, None),
                    Some(PortalResult::Failed(reason)) => {
                        (PortalStatus::Failed, Some(reason.to_string()))
                    }
                    None => (PortalStatus::Failed, Some("internal: no result returned".into())),
                };

                let portal = SnapshotPortal {
                    label: target.label.clone(),
                    url: target.url.clone(),
                    status,
                    reason,
                    prices: result
                        .map(|r| r.samples().iter().map(SnapshotPrice::from).collect())
                        .unwrap_or_default(),
                    qualifying: outcome
                        .qualifying_prices
                        .get(&target.portal)
                        .map(|samples| samples.iter().map(SnapshotPrice::from).collect())
                        .unwrap_or_default(),
                };
                (target.portal.to_string(), portal)
            })
            .collect();

        Self {
            name: outcome.event.name.clone(),
            portals,
            state: SnapshotState::from(&outcome.state),
            cheapest_portal: outcome.cheapest_portal.as_ref().map(ToString::to_string),
        }
    }
}

/// Publishes snapshots to a JSON file, replacing it atomically.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;

        info!(
            "Snapshot with {} event(s) written to {}",
            snapshot.events.len(),
            self.path.display()
        );
        Ok(())
    }
}
