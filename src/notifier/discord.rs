//! # Discord Webhook Integration
//!
//! Sends ticket alerts to a Discord channel as rich embeds. Each game with an
//! in-range price gets its own embed with one inline field per portal and a
//! verdict field. Pages that could not be checked are listed in a final red
//! embed.
//!
//! ## Discord Embed Structure
//!
//! - **Title**: "🎟️ {game}"
//! - **Description**: the verdict, e.g. "P1 Travel cheaper by €330"
//! - **URL**: the cheapest portal's page
//! - **Color**: green when both portals are in range, blue when only one is
//! - **Fields**: best in-range price per portal
//!
//! ## Rate Limits
//!
//! Discord webhooks accept at most 10 embeds per message and 25 fields per
//! embed. Games beyond the embed limit are summarised in the message content.
//!
//! ## Environment Configuration
//!
//! The webhook URL comes from the `DISCORD_WEBHOOK_URL` secret.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{error, info};

use super::{format_price, verdict, TicketAlert};
use crate::errors::DispatchError;
use crate::models::{DiscordEmbed, DiscordField, DiscordMessage, OutcomeState};
use crate::traits::Notifier;

const MAX_EMBEDS: usize = 10;
const MAX_FIELDS: usize = 25;
const BOTH_IN_RANGE_COLOR: u32 = 0x0027_AE60;
const ONE_IN_RANGE_COLOR: u32 = 0x0029_80B9;
const FAILED_COLOR: u32 = 0x00C0_392B;

/// Discord webhook notification client for ticket alerts.
///
/// Holds a reusable HTTP client and the webhook URL. A send only counts as
/// successful when Discord answers with a 2xx status.
pub struct DiscordNotifier {
    /// Reusable HTTP client for making webhook requests to Discord's API.
    client: Client,

    /// Full webhook URL: `https://discord.com/api/webhooks/{id}/{token}`
    webhook_url: String,
}

impl DiscordNotifier {
    /// Creates a notifier posting to `webhook_url`.
    ///
    /// ## Example
    ///
    /// ```rust,ignore
    /// let notifier = DiscordNotifier::new("https://discord.com/api/webhooks/1/abc".into());
    /// notifier.send(&alert).await?;
    /// ```
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    /// Builds the webhook payload for `alert`.
    ///
    /// The message content carries the alert subject. When the failures
    /// embed is present it always takes the last slot, so at most nine games
    /// get their own embed in that case.
    pub fn build_message(alert: &TicketAlert, now: DateTime<Utc>) -> DiscordMessage {
        let timestamp = now.to_rfc3339();
        let game_slots = if alert.failed.is_empty() {
            MAX_EMBEDS
        } else {
            MAX_EMBEDS - 1
        };

        let mut embeds: Vec<DiscordEmbed> = alert
            .outcomes
            .iter()
            .take(game_slots)
            .map(|outcome| {
                let fields = outcome
                    .event
                    .portals
                    .iter()
                    .map(|target| DiscordField {
                        name: target.label.clone(),
                        value: outcome.best_in_range(&target.portal).map_or_else(
                            || format!("Not available · [open]({})", target.url),
                            |best| format!("**{}** · [open]({})", format_price(best), target.url),
                        ),
                        inline: true,
                    })
                    .collect();

                let url = outcome
                    .cheapest_portal
                    .as_ref()
                    .and_then(|portal| outcome.event.target(portal))
                    .map(|target| target.url.clone());

                DiscordEmbed {
                    title: format!("🎟️ {}", outcome.event.name),
                    description: verdict(outcome),
                    url,
                    color: match outcome.state {
                        OutcomeState::BothInRange => BOTH_IN_RANGE_COLOR,
                        _ => ONE_IN_RANGE_COLOR,
                    },
                    timestamp: timestamp.clone(),
                    fields,
                }
            })
            .collect();

        if !alert.failed.is_empty() {
            embeds.push(DiscordEmbed {
                title: format!("⚠️ {} URL(s) could not be checked", alert.failed.len()),
                description: "Check these pages manually.".to_string(),
                url: None,
                color: FAILED_COLOR,
                timestamp,
                fields: alert
                    .failed
                    .iter()
                    .take(MAX_FIELDS)
                    .map(|failure| DiscordField {
                        name: format!("{} · {}", failure.event, failure.portal),
                        value: format!("{} · [open]({})", failure.reason, failure.url),
                        inline: false,
                    })
                    .collect(),
            });
        }

        let mut content = alert.subject.clone();
        let hidden = alert.outcomes.len().saturating_sub(game_slots);
        if hidden > 0 {
            content.push_str(&format!(" (+{hidden} more not shown)"));
        }

        DiscordMessage {
            content: Some(content),
            embeds,
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, alert: &TicketAlert) -> Result<(), DispatchError> {
        let message = Self::build_message(alert, Utc::now());

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Failed to send Discord notification: {}", status);
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Discord notification sent: {}", alert.subject);
        Ok(())
    }
}

/// Manual implementation of `Clone` for `DiscordNotifier`.
///
/// The underlying `reqwest::Client` shares its connection pool between clones.
impl Clone for DiscordNotifier {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            webhook_url: self.webhook_url.clone(),
        }
    }
}
