//! Seams between the run coordinator and its external collaborators

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::{DispatchError, FetchError};
use crate::models::AlertWindowState;
use crate::notifier::TicketAlert;

/// Renders a page in a JavaScript capable environment
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Load `url`, let client side scripts settle and return the final HTML.
    ///
    /// # Returns
    /// * `Result<String, FetchError>` - The rendered document or the reason it could not be produced
    async fn render(&self, url: &str) -> Result<String, FetchError>;
}

/// Decides whether a site permits us to load a given URL
#[async_trait]
pub trait CrawlPolicy: Send + Sync {
    async fn allows(&self, url: &str) -> bool;
}

/// Outbound channel for ticket alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs and run reports
    fn name(&self) -> &'static str;

    /// Deliver one alert. `Ok` means the transport confirmed acceptance.
    async fn send(&self, alert: &TicketAlert) -> Result<(), DispatchError>;
}

/// Persistent storage for the daily alert counter
#[async_trait]
pub trait AlertStateStore: Send + Sync {
    /// Read the stored counter, if any alert was ever recorded.
    async fn load(&self) -> Result<Option<AlertWindowState>>;

    /// Atomically count one sent alert for `today`.
    ///
    /// Resets the counter when the stored day differs from `today` and refuses
    /// to go past `cap`.
    ///
    /// # Returns
    /// * `Result<Option<AlertWindowState>>` - The updated counter, or `None` when the cap was already reached
    async fn record_send(&self, today: NaiveDate, cap: u32) -> Result<Option<AlertWindowState>>;
}
