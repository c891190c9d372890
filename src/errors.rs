//! Error types for fetching, dispatching and configuration

use chromiumoxide::error::CdpError;
use thiserror::Error;

use crate::models::FailureReason;

/// Faults raised while loading a portal page. They never leave the portal
/// scraper; they are folded into `PortalResult::Failed`.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("page load timed out")]
    Timeout,

    #[error("robots.txt disallows this path")]
    RobotsDisallowed,

    #[error("network error: {0}")]
    Network(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl From<FetchError> for FailureReason {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout => Self::Timeout,
            FetchError::RobotsDisallowed => Self::RobotsDisallowed,
            FetchError::Network(detail) => Self::Network(detail),
            FetchError::Browser(detail) => Self::Browser(detail),
        }
    }
}

/// Chromium reports navigation failures as `net::ERR_*` codes; those are
/// network faults, everything else is the browser's own.
impl From<CdpError> for FetchError {
    fn from(err: CdpError) -> Self {
        match err {
            CdpError::Timeout => Self::Timeout,
            err => {
                let detail = err.to_string();
                if detail.contains("net::ERR_") {
                    Self::Network(detail)
                } else {
                    Self::Browser(detail)
                }
            }
        }
    }
}

/// Notification transport failures.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Startup configuration faults. Any of these aborts the process before
/// scraping begins.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("no events configured")]
    EmptyEventList,

    #[error("duplicate event name: {0}")]
    DuplicateEvent(String),

    #[error("event {event} must have one or two portal URLs, found {count}")]
    PortalCount { event: String, count: usize },

    #[error("event {event} references unknown portal {portal}")]
    UnknownPortal { event: String, portal: String },

    #[error("duplicate portal id: {0}")]
    DuplicatePortal(String),

    #[error("invalid URL for event {event}: {url}")]
    InvalidUrl { event: String, url: String },

    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid alert window: {0}")]
    InvalidWindow(String),

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("missing secret {0}")]
    MissingSecret(&'static str),

    #[error("alert mode needs a [notifier] section")]
    MissingNotifier,

    #[error("invalid notifier settings: {0}")]
    InvalidNotifier(String),
}
