//! Data models for events, scraped prices, classification outcomes and
//! Discord webhook payloads

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of a ticket portal as written in the configuration (`p1travel`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalId(pub String);

impl PortalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One portal page to scrape for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalTarget {
    pub portal: PortalId,
    /// Human readable portal name used in notifications
    pub label: String,
    pub url: String,
}

/// A monitored match with one or two portal pages.
///
/// `portals` is kept in configured priority order, which is the order used to
/// break ties between equally cheap portals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub name: String,
    pub portals: Vec<PortalTarget>,
}

impl EventSpec {
    pub fn target(&self, portal: &PortalId) -> Option<&PortalTarget> {
        self.portals.iter().find(|t| &t.portal == portal)
    }
}

/// The only supported currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Currency {
    #[default]
    #[serde(rename = "EUR")]
    Eur,
}

impl Currency {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eur => "€",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Eur => "EUR",
        }
    }
}

/// A currency tagged price found in a rendered portal page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: Currency,
    pub source_portal: PortalId,
}

/// Inclusive price bounds an alert-worthy ticket must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRange {
    pub low: Decimal,
    pub high: Decimal,
}

impl PriceRange {
    pub fn contains(&self, amount: Decimal) -> bool {
        self.low <= amount && amount <= self.high
    }
}

/// Why a portal page could not be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    RobotsDisallowed,
    Network(String),
    Browser(String),
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::RobotsDisallowed => f.write_str("robots_disallowed"),
            Self::Network(detail) => write!(f, "network: {detail}"),
            Self::Browser(detail) => write!(f, "browser: {detail}"),
            Self::Internal(detail) => write!(f, "internal: {detail}"),
        }
    }
}

/// Result of scraping one portal page for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalResult {
    Ok(Vec<PriceSample>),
    Empty,
    Failed(FailureReason),
}

impl PortalResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn samples(&self) -> &[PriceSample] {
        match self {
            Self::Ok(samples) => samples,
            Self::Empty | Self::Failed(_) => &[],
        }
    }
}

/// Classification of an event after both portals have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeState {
    BothInRange,
    OneInRange(PortalId),
    NoneInRange,
    /// Every configured portal failed
    Failed(Vec<PortalId>),
}

impl OutcomeState {
    pub fn is_alert_worthy(&self) -> bool {
        matches!(self, Self::BothInRange | Self::OneInRange(_))
    }
}

/// Per-event unit handed to the notifier or the snapshot writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    pub event: EventSpec,
    pub state: OutcomeState,
    pub results: BTreeMap<PortalId, PortalResult>,
    /// In-range samples per portal, in document order. Portals without any
    /// in-range sample have no entry.
    pub qualifying_prices: BTreeMap<PortalId, Vec<PriceSample>>,
    pub cheapest_portal: Option<PortalId>,
}

impl EventOutcome {
    pub fn best_in_range(&self, portal: &PortalId) -> Option<Decimal> {
        self.qualifying_prices
            .get(portal)
            .and_then(|samples| samples.iter().map(|s| s.amount).min())
    }

    /// Price difference between the two portals' best in-range tickets.
    pub fn saving(&self) -> Option<Decimal> {
        if self.state != OutcomeState::BothInRange {
            return None;
        }

        let mut best = self
            .event
            .portals
            .iter()
            .filter_map(|t| self.best_in_range(&t.portal));
        let first = best.next()?;
        let second = best.next()?;

        Some((first - second).abs())
    }
}

/// Persisted daily alert counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertWindowState {
    pub date: NaiveDate,
    pub alerts_sent_today: u32,
}

impl AlertWindowState {
    /// Alerts already sent on `day`; a stored counter for another day counts as zero.
    pub fn sent_on(&self, day: NaiveDate) -> u32 {
        if self.date == day {
            self.alerts_sent_today
        } else {
            0
        }
    }
}

/// Discord embed structure for rich notifications
#[derive(Debug, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub color: u32,
    pub timestamp: String,
    pub fields: Vec<DiscordField>,
}

/// Key-value field for Discord embeds
#[derive(Debug, Serialize)]
pub struct DiscordField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Discord webhook message payload
#[derive(Debug, Serialize)]
pub struct DiscordMessage {
    pub content: Option<String>,
    pub embeds: Vec<DiscordEmbed>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn sample(amount: i64, portal: &str) -> PriceSample {
        PriceSample {
            amount: Decimal::from(amount),
            currency: Currency::Eur,
            source_portal: PortalId::new(portal),
        }
    }

    #[test]
    fn counter_from_previous_day_reads_as_zero() {
        let state = AlertWindowState {
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            alerts_sent_today: 7,
        };

        assert_eq!(state.sent_on(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()), 7);
        assert_eq!(state.sent_on(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()), 0);
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let range = PriceRange {
            low: Decimal::from(100),
            high: Decimal::from(500),
        };

        assert!(range.contains(Decimal::from(100)));
        assert!(range.contains(Decimal::from(500)));
        assert!(!range.contains(Decimal::new(9999, 2)));
        assert!(!range.contains(Decimal::new(50001, 2)));
    }

    #[test]
    fn price_sample_amount_serializes_as_number() {
        let json = serde_json::to_value(sample(120, "p1travel")).unwrap();

        assert_eq!(json["amount"], serde_json::json!(120.0));
        assert_eq!(json["currency"], "EUR");
        assert_eq!(json["source_portal"], "p1travel");
    }

    #[test]
    fn failure_reasons_render_as_short_codes() {
        assert_eq!(FailureReason::Timeout.to_string(), "timeout");
        assert_eq!(FailureReason::RobotsDisallowed.to_string(), "robots_disallowed");
        assert_eq!(
            FailureReason::Network("connection reset".into()).to_string(),
            "network: connection reset"
        );
    }
}
