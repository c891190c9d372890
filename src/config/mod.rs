//! Startup configuration
//!
//! Non-secret settings come from a TOML file, delivery credentials from the
//! environment (a `.env` file is loaded first). Everything is validated once
//! into a typed [`Config`]; any problem is a [`ConfigError`] and the process
//! stops before a single page is scraped.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use reqwest::Url;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::alert_gate::AlertWindow;
use crate::errors::ConfigError;
use crate::models::{EventSpec, PortalId, PortalTarget, PriceRange};

pub const DEFAULT_USER_AGENT: &str =
    "TicketPriceMonitor/1.0 (personal price tracker) chromiumoxide/Chromium";

const DEFAULT_RESEND_SENDER: &str = "Ticket Alert <onboarding@resend.dev>";

/// What a run publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Send a notification when prices qualify
    #[default]
    Alert,
    /// Write the full JSON snapshot for the display client
    Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub mode: Mode,
    pub thresholds: ThresholdsConfig,
    pub alert_window: AlertWindowConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    pub notifier: Option<NotifierConfig>,
    #[serde(default)]
    pub portals: Vec<PortalConfig>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdsConfig {
    pub low: Decimal,
    pub high: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertWindowConfig {
    /// Local `HH:MM`, inclusive
    pub start: String,
    /// Local `HH:MM`, exclusive
    pub end: String,
    /// IANA timezone name, e.g. `America/Los_Angeles`
    pub timezone: String,
    pub max_alerts_per_day: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_timeout_secs: u64,
    pub settle_millis: u64,
    pub run_timeout_secs: u64,
    pub max_concurrent_renders: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: 30,
            settle_millis: 3_000,
            run_timeout_secs: 300,
            max_concurrent_renders: 4,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:state/alerts.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub path: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("docs/data/prices.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    Resend,
    Discord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    /// E-mail address for the Resend notifier
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    pub name: String,
    pub urls: BTreeMap<String, String>,
}

/// Delivery credentials taken from the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub resend_api_key: Option<String>,
    pub resend_sender: Option<String>,
    pub discord_webhook_url: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            resend_api_key: var("RESEND_API_KEY"),
            resend_sender: var("RESEND_SENDER"),
            discord_webhook_url: var("DISCORD_WEBHOOK_URL"),
        }
    }
}

/// Resolved notifier settings, secrets included.
#[derive(Clone)]
pub enum NotifierSettings {
    Resend {
        api_key: String,
        sender: String,
        recipient: String,
    },
    Discord {
        webhook_url: String,
    },
}

impl std::fmt::Debug for NotifierSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials stay out of logs
        match self {
            Self::Resend { recipient, .. } => write!(f, "Resend {{ recipient: {recipient} }}"),
            Self::Discord { .. } => f.write_str("Discord"),
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub range: PriceRange,
    pub window: AlertWindow,
    pub max_alerts_per_day: u32,
    pub fetch: FetchConfig,
    pub database_url: String,
    pub snapshot_path: PathBuf,
    /// Present in alert mode only
    pub notifier: Option<NotifierSettings>,
    pub events: Vec<EventSpec>,
}

impl Config {
    pub fn load(
        path: &Path,
        mode_override: Option<Mode>,
        secrets: &Secrets,
    ) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut file: ConfigFile = toml::from_str(&contents)?;
        if let Some(mode) = mode_override {
            file.mode = mode;
        }

        file.validate(secrets)
    }
}

impl ConfigFile {
    pub fn validate(self, secrets: &Secrets) -> Result<Config, ConfigError> {
        let range = self.thresholds.validate()?;
        let window = self.alert_window.validate()?;

        if self.alert_window.max_alerts_per_day == 0 {
            return Err(ConfigError::ZeroLimit("max_alerts_per_day"));
        }
        if self.fetch.max_concurrent_renders == 0 {
            return Err(ConfigError::ZeroLimit("max_concurrent_renders"));
        }
        if self.fetch.page_timeout_secs == 0 {
            return Err(ConfigError::ZeroLimit("page_timeout_secs"));
        }
        if self.fetch.run_timeout_secs == 0 {
            return Err(ConfigError::ZeroLimit("run_timeout_secs"));
        }

        let events = validate_events(&self.portals, &self.events)?;

        let notifier = match self.mode {
            Mode::Alert => Some(resolve_notifier(self.notifier.as_ref(), secrets)?),
            Mode::Snapshot => None,
        };

        Ok(Config {
            mode: self.mode,
            range,
            window,
            max_alerts_per_day: self.alert_window.max_alerts_per_day,
            fetch: self.fetch,
            database_url: self.storage.database_url,
            snapshot_path: self.snapshot.path,
            notifier,
            events,
        })
    }
}

impl ThresholdsConfig {
    fn validate(&self) -> Result<PriceRange, ConfigError> {
        if self.low <= Decimal::ZERO {
            return Err(ConfigError::InvalidThresholds(format!(
                "low must be positive, got {}",
                self.low
            )));
        }
        if self.low > self.high {
            return Err(ConfigError::InvalidThresholds(format!(
                "low {} is above high {}",
                self.low, self.high
            )));
        }

        Ok(PriceRange {
            low: self.low,
            high: self.high,
        })
    }
}

impl AlertWindowConfig {
    fn validate(&self) -> Result<AlertWindow, ConfigError> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))?;

        let parse = |value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M")
                .map_err(|_| ConfigError::InvalidWindow(format!("cannot parse time {value:?}")))
        };
        let start = parse(&self.start)?;
        let end = parse(&self.end)?;

        if start == end {
            return Err(ConfigError::InvalidWindow(
                "start and end are identical".to_string(),
            ));
        }

        Ok(AlertWindow {
            start,
            end,
            timezone,
        })
    }
}

fn validate_events(
    portals: &[PortalConfig],
    events: &[EventConfig],
) -> Result<Vec<EventSpec>, ConfigError> {
    let mut seen_portals = HashSet::new();
    for portal in portals {
        if !seen_portals.insert(portal.id.as_str()) {
            return Err(ConfigError::DuplicatePortal(portal.id.clone()));
        }
    }

    if events.is_empty() {
        return Err(ConfigError::EmptyEventList);
    }

    let mut names = HashSet::new();
    let mut specs = Vec::with_capacity(events.len());

    for event in events {
        if !names.insert(event.name.as_str()) {
            return Err(ConfigError::DuplicateEvent(event.name.clone()));
        }

        let count = event.urls.len();
        if !(1..=2).contains(&count) {
            return Err(ConfigError::PortalCount {
                event: event.name.clone(),
                count,
            });
        }

        for (portal, url) in &event.urls {
            if !seen_portals.contains(portal.as_str()) {
                return Err(ConfigError::UnknownPortal {
                    event: event.name.clone(),
                    portal: portal.clone(),
                });
            }

            let valid = Url::parse(url)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidUrl {
                    event: event.name.clone(),
                    url: url.clone(),
                });
            }
        }

        // Priority order is the order of the [[portals]] list
        let targets = portals
            .iter()
            .filter_map(|portal| {
                event.urls.get(&portal.id).map(|url| PortalTarget {
                    portal: PortalId::new(portal.id.clone()),
                    label: portal.label.clone(),
                    url: url.clone(),
                })
            })
            .collect();

        specs.push(EventSpec {
            name: event.name.clone(),
            portals: targets,
        });
    }

    Ok(specs)
}

fn resolve_notifier(
    config: Option<&NotifierConfig>,
    secrets: &Secrets,
) -> Result<NotifierSettings, ConfigError> {
    let config = config.ok_or(ConfigError::MissingNotifier)?;

    match config.kind {
        NotifierKind::Resend => Ok(NotifierSettings::Resend {
            api_key: secrets
                .resend_api_key
                .clone()
                .ok_or(ConfigError::MissingSecret("RESEND_API_KEY"))?,
            sender: secrets
                .resend_sender
                .clone()
                .unwrap_or_else(|| DEFAULT_RESEND_SENDER.to_string()),
            recipient: config
                .recipient
                .clone()
                .filter(|r| r.contains('@'))
                .ok_or_else(|| {
                    ConfigError::InvalidNotifier("resend needs a recipient e-mail address".into())
                })?,
        }),
        NotifierKind::Discord => Ok(NotifierSettings::Discord {
            webhook_url: secrets
                .discord_webhook_url
                .clone()
                .ok_or(ConfigError::MissingSecret("DISCORD_WEBHOOK_URL"))?,
        }),
    }
}
