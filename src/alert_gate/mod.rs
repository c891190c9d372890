//! Time window and daily cap for outbound alerts
//!
//! The gate only answers "may a notification go out now?". It never looks at
//! prices. Local time is always computed in the configured timezone, never in
//! the timezone of the machine running the job.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::models::AlertWindowState;
use crate::traits::AlertStateStore;

/// Local wall-clock interval in which alerts may be sent.
///
/// `start` is inclusive, `end` exclusive. A start after the end wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl AlertWindow {
    pub fn contains(&self, local: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= local && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }

    pub fn local_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.timezone).time()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    OutsideWindow,
    CapReached,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutsideWindow => f.write_str("outside_window"),
            Self::CapReached => f.write_str("cap_reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied(DenyReason),
}

pub struct AlertGate {
    store: Arc<dyn AlertStateStore>,
    window: AlertWindow,
    max_per_day: u32,
}

impl AlertGate {
    pub fn new(store: Arc<dyn AlertStateStore>, window: AlertWindow, max_per_day: u32) -> Self {
        Self {
            store,
            window,
            max_per_day,
        }
    }

    /// Check the daily cap and the window. The cap wins when both deny.
    pub async fn may_alert(&self, now: DateTime<Utc>) -> Result<GateDecision> {
        let today = self.window.local_day(now);
        let sent = self
            .store
            .load()
            .await?
            .map_or(0, |state| state.sent_on(today));

        if sent >= self.max_per_day {
            info!(
                "Daily cap reached ({}/{}) for {}",
                sent, self.max_per_day, today
            );
            return Ok(GateDecision::Denied(DenyReason::CapReached));
        }

        let local = self.window.local_time(now);
        if !self.window.contains(local) {
            info!(
                "Local time {} ({}) is outside the alert window {}-{}",
                local.format("%H:%M"),
                self.window.timezone.name(),
                self.window.start.format("%H:%M"),
                self.window.end.format("%H:%M")
            );
            return Ok(GateDecision::Denied(DenyReason::OutsideWindow));
        }

        Ok(GateDecision::Allowed)
    }

    /// Count a confirmed dispatch against today's local cap.
    pub async fn record_alert_sent(&self, now: DateTime<Utc>) -> Result<AlertWindowState> {
        let today = self.window.local_day(now);

        match self.store.record_send(today, self.max_per_day).await? {
            Some(state) => {
                info!(
                    "Alerts sent on {}: {}/{}",
                    state.date, state.alerts_sent_today, self.max_per_day
                );
                Ok(state)
            }
            None => {
                warn!("Daily cap was consumed by an overlapping run, counter left at the cap");
                Ok(AlertWindowState {
                    date: today,
                    alerts_sent_today: self.max_per_day,
                })
            }
        }
    }
}
