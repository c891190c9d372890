//! # Ticket alert notifications
//!
//! Builds the alert payload from a run's qualifying outcomes and hands it to
//! one of the outbound channels:
//!
//! - **Resend**: HTML + plain text e-mail through the Resend HTTP API
//! - **Discord**: rich embeds through a channel webhook
//!
//! Every notifier reports success only when the remote side accepted the
//! message. There are no internal retries; the caller decides what an
//! unconfirmed send means for the daily cap.

pub mod discord;
pub mod resend;

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;

use crate::config::NotifierSettings;
use crate::models::{
    Currency, EventOutcome, OutcomeState, PortalId, PortalResult, PortalTarget, PriceRange,
};
use crate::traits::Notifier;

pub use discord::DiscordNotifier;
pub use resend::ResendNotifier;

/// Build the channel selected in the configuration.
pub fn from_settings(settings: &NotifierSettings) -> Result<Arc<dyn Notifier>> {
    Ok(match settings {
        NotifierSettings::Resend {
            api_key,
            sender,
            recipient,
        } => Arc::new(ResendNotifier::new(
            api_key.clone(),
            sender.clone(),
            recipient.clone(),
        )?),
        NotifierSettings::Discord { webhook_url } => {
            Arc::new(DiscordNotifier::new(webhook_url.clone()))
        }
    })
}

/// A portal page that could not be checked or showed no prices at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPortal {
    pub event: String,
    pub portal: String,
    pub url: String,
    pub reason: String,
}

/// Everything a notifier needs to render one alert.
#[derive(Debug, Clone)]
pub struct TicketAlert {
    pub subject: String,
    /// Outcomes with at least one in-range portal
    pub outcomes: Vec<EventOutcome>,
    pub failed: Vec<FailedPortal>,
    pub range: PriceRange,
}

impl TicketAlert {
    /// Build an alert from a run's outcomes. Returns `None` when no event has
    /// an in-range price.
    pub fn build(outcomes: &[EventOutcome], range: PriceRange) -> Option<Self> {
        let qualifying: Vec<EventOutcome> = outcomes
            .iter()
            .filter(|o| o.state.is_alert_worthy())
            .cloned()
            .collect();

        if qualifying.is_empty() {
            return None;
        }

        let failed: Vec<FailedPortal> = outcomes
            .iter()
            .flat_map(|outcome| {
                outcome.event.portals.iter().filter_map(move |target| {
                    failure_reason(outcome.results.get(&target.portal)?).map(|reason| {
                        FailedPortal {
                            event: outcome.event.name.clone(),
                            portal: target.label.clone(),
                            url: target.url.clone(),
                            reason,
                        }
                    })
                })
            })
            .collect();

        let mut parts = vec![format!("{} game(s) in range", qualifying.len())];
        if !failed.is_empty() {
            parts.push(format!("{} URL(s) failed", failed.len()));
        }

        Some(Self {
            subject: format!("🎟️ Ticket Alert — {}", parts.join(" · ")),
            outcomes: qualifying,
            failed,
            range,
        })
    }

    pub fn html_body(&self) -> String {
        let mut html = String::from(
            r#"<html><body style="font-family:Arial,sans-serif;max-width:800px;margin:auto;color:#2c3e50">
<h2>🎟️ Ticket Price Alert</h2>
"#,
        );

        html.push_str(&format!(
            r#"<h3>Games with tickets in range</h3>
<p style="color:#555">Cheapest price per portal within {}–{}. Green = cheaper of the two, blue = only portal in range.</p>
<table width="100%" cellspacing="0" style="border-collapse:collapse">
<tr style="background:#2c3e50;color:#fff;text-align:left"><th style="padding:10px">Game</th><th style="padding:10px">Prices</th><th style="padding:10px">Verdict</th></tr>
"#,
            format_price(self.range.low),
            format_price(self.range.high)
        ));

        for outcome in &self.outcomes {
            let cells: Vec<String> = outcome
                .event
                .portals
                .iter()
                .map(|target| price_cell(outcome, target))
                .collect();

            html.push_str(&format!(
                r#"<tr style="border-bottom:1px solid #eee"><td style="padding:10px;font-weight:bold">{}</td><td style="padding:10px">{}</td><td style="padding:10px">{}</td></tr>
"#,
                escape_html(&outcome.event.name),
                cells.join("<br>"),
                escape_html(&verdict(outcome))
            ));
        }
        html.push_str("</table>\n");

        if !self.failed.is_empty() {
            html.push_str(
                r#"<h3 style="color:#c0392b">URLs that could not be checked</h3>
<table width="100%" cellspacing="0" style="border-collapse:collapse">
<tr style="background:#c0392b;color:#fff;text-align:left"><th style="padding:10px">Game</th><th style="padding:10px">Portal</th><th style="padding:10px">URL</th><th style="padding:10px">Reason</th></tr>
"#,
            );
            for failure in &self.failed {
                html.push_str(&format!(
                    r#"<tr><td style="padding:10px">{}</td><td style="padding:10px">{}</td><td style="padding:10px"><a href="{url}">{url}</a></td><td style="padding:10px;color:#888">{}</td></tr>
"#,
                    escape_html(&failure.event),
                    escape_html(&failure.portal),
                    escape_html(&failure.reason),
                    url = escape_html(&failure.url),
                ));
            }
            html.push_str("</table>\n");
        }

        html.push_str("</body></html>\n");
        html
    }

    pub fn text_body(&self) -> String {
        let rule = "-".repeat(50);
        let mut lines = vec![
            "TICKET PRICE ALERT".to_string(),
            "=".repeat(50),
            String::new(),
            format!(
                "GAMES WITH TICKETS IN RANGE ({}–{})",
                format_price(self.range.low),
                format_price(self.range.high)
            ),
            rule.clone(),
        ];

        for outcome in &self.outcomes {
            lines.push(format!("Game:     {}", outcome.event.name));
            for target in &outcome.event.portals {
                let price = outcome
                    .best_in_range(&target.portal)
                    .map_or_else(|| "Not available".to_string(), format_price);
                lines.push(format!("{}: {}  ->  {}", target.label, price, target.url));
            }
            lines.push(format!("Verdict:  {}", verdict(outcome)));
            lines.push(String::new());
        }

        if !self.failed.is_empty() {
            lines.push("FAILED URLS - CHECK MANUALLY".to_string());
            lines.push(rule);
            for failure in &self.failed {
                lines.push(format!("Game:    {}", failure.event));
                lines.push(format!("Portal:  {}", failure.portal));
                lines.push(format!("URL:     {}", failure.url));
                lines.push(format!("Reason:  {}", failure.reason));
                lines.push(String::new());
            }
        }

        lines.join("\n")
    }
}

fn failure_reason(result: &PortalResult) -> Option<String> {
    match result {
        PortalResult::Failed(reason) => Some(reason.to_string()),
        PortalResult::Empty => Some("page loaded but no prices found".to_string()),
        PortalResult::Ok(_) => None,
    }
}

fn price_cell(outcome: &EventOutcome, target: &PortalTarget) -> String {
    let label = escape_html(&target.label);
    let url = escape_html(&target.url);

    match outcome.best_in_range(&target.portal) {
        None => format!(
            r#"<span style="color:#aaa;font-style:italic">{label}: not available</span> <a href="{url}">→</a>"#
        ),
        Some(best) => {
            let colour = match (&outcome.state, outcome.cheapest_portal.as_ref()) {
                (OutcomeState::OneInRange(_), _) => "#2980b9",
                (OutcomeState::BothInRange, Some(cheapest)) if *cheapest == target.portal => {
                    "#27ae60"
                }
                _ => "#555",
            };
            format!(
                r#"<span style="color:{colour};font-weight:bold">{label}: {}</span> <a href="{url}">→</a>"#,
                format_price(best)
            )
        }
    }
}

/// One line summary: which portal is cheaper, or which one is the only option.
pub fn verdict(outcome: &EventOutcome) -> String {
    let label_of = |portal: &PortalId| {
        outcome
            .event
            .target(portal)
            .map_or_else(|| portal.to_string(), |t| t.label.clone())
    };

    match (&outcome.state, outcome.cheapest_portal.as_ref()) {
        (OutcomeState::BothInRange, Some(cheapest)) => match outcome.saving() {
            Some(saving) if saving > Decimal::ZERO => {
                format!("{} cheaper by {}", label_of(cheapest), format_price(saving))
            }
            _ => "Same price on both portals".to_string(),
        },
        (OutcomeState::OneInRange(portal), _) => format!("Only {} available", label_of(portal)),
        _ => "No tickets in range".to_string(),
    }
}

pub fn format_price(amount: Decimal) -> String {
    format!("{}{}", Currency::Eur.symbol(), amount.normalize())
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::aggregator::GameAggregator;
    use crate::models::{EventSpec, FailureReason, PriceSample};

    fn range() -> PriceRange {
        PriceRange {
            low: Decimal::from(100),
            high: Decimal::from(500),
        }
    }

    fn event(name: &str) -> EventSpec {
        EventSpec {
            name: name.into(),
            portals: vec![
                PortalTarget {
                    portal: PortalId::new("p1"),
                    label: "P1 Travel".into(),
                    url: format!("https://p1.test/{name}"),
                },
                PortalTarget {
                    portal: PortalId::new("ct"),
                    label: "Champions Travel".into(),
                    url: format!("https://ct.test/{name}"),
                },
            ],
        }
    }

    fn ok(portal: &str, amounts: &[i64]) -> PortalResult {
        PortalResult::Ok(
            amounts
                .iter()
                .map(|&a| PriceSample {
                    amount: Decimal::from(a),
                    currency: Currency::Eur,
                    source_portal: PortalId::new(portal),
                })
                .collect(),
        )
    }

    fn outcomes() -> Vec<EventOutcome> {
        let aggregator = GameAggregator::new(range());
        vec![
            aggregator.classify(
                &event("Arsenal"),
                &HashMap::from([
                    (PortalId::new("p1"), ok("p1", &[120, 600])),
                    (PortalId::new("ct"), ok("ct", &[90, 450])),
                ]),
            ),
            aggregator.classify(
                &event("Chelsea"),
                &HashMap::from([
                    (PortalId::new("p1"), PortalResult::Failed(FailureReason::Timeout)),
                    (PortalId::new("ct"), ok("ct", &[300])),
                ]),
            ),
            aggregator.classify(
                &event("City"),
                &HashMap::from([
                    (PortalId::new("p1"), PortalResult::Empty),
                    (PortalId::new("ct"), ok("ct", &[900])),
                ]),
            ),
        ]
    }

    #[test]
    fn no_alert_without_qualifying_prices() {
        let all = outcomes();

        assert!(TicketAlert::build(&all[2..], range()).is_none());
    }

    #[test]
    fn subject_counts_games_and_failures() {
        let alert = TicketAlert::build(&outcomes(), range()).unwrap();

        assert_eq!(alert.subject, "🎟️ Ticket Alert — 2 game(s) in range · 2 URL(s) failed");
        assert_eq!(alert.outcomes.len(), 2);
        assert_eq!(
            alert.failed,
            vec![
                FailedPortal {
                    event: "Chelsea".into(),
                    portal: "P1 Travel".into(),
                    url: "https://p1.test/Chelsea".into(),
                    reason: "timeout".into(),
                },
                FailedPortal {
                    event: "City".into(),
                    portal: "P1 Travel".into(),
                    url: "https://p1.test/City".into(),
                    reason: "page loaded but no prices found".into(),
                },
            ]
        );
    }

    #[test]
    fn verdict_names_cheaper_portal_and_saving() {
        let all = outcomes();

        assert_eq!(verdict(&all[0]), "P1 Travel cheaper by €330");
        assert_eq!(verdict(&all[1]), "Only Champions Travel available");
        assert_eq!(verdict(&all[2]), "No tickets in range");
    }

    #[test]
    fn bodies_list_prices_and_failures() {
        let alert = TicketAlert::build(&outcomes(), range()).unwrap();

        let text = alert.text_body();
        assert!(text.contains("GAMES WITH TICKETS IN RANGE (€100–€500)"));
        assert!(text.contains("P1 Travel: €120  ->  https://p1.test/Arsenal"));
        assert!(text.contains("P1 Travel: Not available  ->  https://p1.test/Chelsea"));
        assert!(text.contains("Reason:  timeout"));

        let html = alert.html_body();
        assert!(html.contains("#27ae60"));
        assert!(html.contains("URLs that could not be checked"));
    }

    #[test]
    fn html_escapes_event_names() {
        let mut all = outcomes();
        all[0].event.name = "Spurs <b>& Co</b>".into();

        let html = TicketAlert::build(&all, range()).unwrap().html_body();

        assert!(html.contains("Spurs &lt;b&gt;&amp; Co&lt;/b&gt;"));
    }

    #[test]
    fn prices_drop_trailing_zeros() {
        assert_eq!(format_price(Decimal::new(12000, 2)), "€120");
        assert_eq!(format_price(Decimal::new(9950, 2)), "€99.5");
    }
}
