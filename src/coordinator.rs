use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::aggregator::GameAggregator;
use crate::alert_gate::{AlertGate, DenyReason, GateDecision};
use crate::models::{EventOutcome, EventSpec, FailureReason, PortalId, PortalResult};
use crate::notifier::TicketAlert;
use crate::scraper::PortalScraper;
use crate::snapshot::{Snapshot, SnapshotWriter};
use crate::traits::Notifier;

/// Where a run's results go.
pub enum Output {
    Alert {
        gate: AlertGate,
        notifier: Arc<dyn Notifier>,
    },
    Snapshot(SnapshotWriter),
}

/// What happened to a run's results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    NoQualifyingPrices,
    Suppressed(DenyReason),
    /// The notification went out. `alerts_sent_today` is `None` when the
    /// counter could not be updated afterwards.
    Sent {
        notifier: &'static str,
        alerts_sent_today: Option<u32>,
    },
    DispatchFailed(String),
    SnapshotWritten {
        path: PathBuf,
    },
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoQualifyingPrices => f.write_str("no qualifying prices"),
            Self::Suppressed(reason) => write!(f, "alert suppressed ({reason})"),
            Self::Sent {
                notifier,
                alerts_sent_today: Some(count),
            } => write!(f, "alert sent via {notifier} ({count} today)"),
            Self::Sent {
                notifier,
                alerts_sent_today: None,
            } => write!(f, "alert sent via {notifier} (counter update failed)"),
            Self::DispatchFailed(reason) => write!(f, "dispatch failed: {reason}"),
            Self::SnapshotWritten { path } => write!(f, "snapshot written to {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    /// One outcome per configured event, sorted by event name
    pub outcomes: Vec<EventOutcome>,
    pub delivery: Delivery,
}

impl RunReport {
    pub fn qualifying_events(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state.is_alert_worthy())
            .count()
    }

    pub fn failed_pages(&self) -> usize {
        self.outcomes
            .iter()
            .flat_map(|o| o.results.values())
            .filter(|r| r.is_failed())
            .count()
    }

    pub fn log_summary(&self) {
        info!(
            "Run started {} finished: {} event(s), {} in range, {} page(s) failed, {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.outcomes.len(),
            self.qualifying_events(),
            self.failed_pages(),
            self.delivery
        );
    }
}

pub struct RunCoordinator {
    scraper: Arc<PortalScraper>,
    aggregator: GameAggregator,
    events: Vec<EventSpec>,
    render_slots: Arc<Semaphore>,
    run_timeout: Duration,
    output: Output,
}

impl RunCoordinator {
    pub fn new(
        scraper: PortalScraper,
        aggregator: GameAggregator,
        events: Vec<EventSpec>,
        max_concurrent_renders: usize,
        run_timeout: Duration,
        output: Output,
    ) -> Self {
        Self {
            scraper: Arc::new(scraper),
            aggregator,
            events,
            render_slots: Arc::new(Semaphore::new(max_concurrent_renders)),
            run_timeout,
            output,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport> {
        info!(
            "Checking {} event(s) across {} page(s)",
            self.events.len(),
            self.events.iter().map(|e| e.portals.len()).sum::<usize>()
        );

        let results = self.scrape_all().await;

        let mut outcomes: Vec<EventOutcome> = self
            .events
            .iter()
            .zip(results)
            .map(|(event, results)| self.aggregator.classify(event, &results))
            .collect();
        outcomes.sort_by(|a, b| a.event.name.cmp(&b.event.name));

        let delivery = match &self.output {
            Output::Alert { gate, notifier } => {
                self.deliver_alert(&outcomes, gate, notifier.as_ref(), now)
                    .await?
            }
            Output::Snapshot(writer) => {
                let snapshot = Snapshot::from_outcomes(&outcomes, self.aggregator.range(), now);
                writer.write(&snapshot).await?;
                Delivery::SnapshotWritten {
                    path: writer.path().to_path_buf(),
                }
            }
        };

        let report = RunReport {
            started_at: now,
            outcomes,
            delivery,
        };
        report.log_summary();
        Ok(report)
    }

    /// Scrape every (event, portal) pair concurrently. The returned vector is
    /// indexed like `self.events`; anything unresolved when the run deadline
    /// passes is reported as a timeout.
    async fn scrape_all(&self) -> Vec<HashMap<PortalId, PortalResult>> {
        let deadline = Instant::now() + self.run_timeout;
        let mut tasks = JoinSet::new();

        for (index, event) in self.events.iter().enumerate() {
            for target in &event.portals {
                let scraper = Arc::clone(&self.scraper);
                let slots = Arc::clone(&self.render_slots);
                let name = event.name.clone();
                let portal = target.portal.clone();
                let url = target.url.clone();

                tasks.spawn(async move {
                    let result = match slots.acquire_owned().await {
                        Ok(_permit) => scraper.scrape(&name, &portal, &url).await,
                        Err(_) => PortalResult::Failed(FailureReason::Internal(
                            "render slots closed".into(),
                        )),
                    };
                    (index, portal, result)
                });
            }
        }

        let mut results: Vec<HashMap<PortalId, PortalResult>> =
            vec![HashMap::new(); self.events.len()];
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, portal, result)))) => {
                    results[index].insert(portal, result);
                }
                Ok(Some(Err(join_error))) => {
                    error!("Scrape task failed: {}", join_error);
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(
                "Run deadline of {:?} passed with {} page(s) unresolved",
                self.run_timeout,
                tasks.len()
            );
            tasks.abort_all();
        }

        for (event, results) in self.events.iter().zip(results.iter_mut()) {
            for target in &event.portals {
                results.entry(target.portal.clone()).or_insert_with(|| {
                    PortalResult::Failed(if timed_out {
                        FailureReason::Timeout
                    } else {
                        FailureReason::Internal("scrape task panicked".into())
                    })
                });
            }
        }

        results
    }

    async fn deliver_alert(
        &self,
        outcomes: &[EventOutcome],
        gate: &AlertGate,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> Result<Delivery> {
        let Some(alert) = TicketAlert::build(outcomes, self.aggregator.range()) else {
            return Ok(Delivery::NoQualifyingPrices);
        };

        if let GateDecision::Denied(reason) = gate.may_alert(now).await? {
            return Ok(Delivery::Suppressed(reason));
        }

        info!("Sending alert via {}: {}", notifier.name(), alert.subject);
        if let Err(e) = notifier.send(&alert).await {
            warn!("Alert not delivered, daily cap untouched: {}", e);
            return Ok(Delivery::DispatchFailed(e.to_string()));
        }

        // The alert is out; a counter fault must not lose the report
        let alerts_sent_today = match gate.record_alert_sent(now).await {
            Ok(state) => Some(state.alerts_sent_today),
            Err(e) => {
                error!("Alert sent but the daily counter was not updated: {:#}", e);
                None
            }
        };
        Ok(Delivery::Sent {
            notifier: notifier.name(),
            alerts_sent_today,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use rust_decimal::Decimal;

    use super::*;
    use crate::alert_gate::AlertWindow;
    use crate::database::Database;
    use crate::extractor::PriceExtractor;
    use crate::models::{AlertWindowState, Currency, OutcomeState, PortalTarget, PriceRange};
    use crate::notifier::testing::RecordingNotifier;
    use crate::scraper::testing::{DenyList, Page, ScriptedRenderer};
    use crate::scraper::PageFetcher;
    use crate::snapshot::SnapshotState;
    use crate::traits::AlertStateStore;

    const ARSENAL_P1: &str = "https://p1.test/arsenal";
    const ARSENAL_CT: &str = "https://ct.test/arsenal";
    const CHELSEA_P1: &str = "https://p1.test/chelsea";
    const CHELSEA_CT: &str = "https://ct.test/chelsea";

    fn events() -> Vec<EventSpec> {
        let target = |portal: &str, url: &str| PortalTarget {
            portal: PortalId::new(portal),
            label: portal.to_uppercase(),
            url: url.into(),
        };
        vec![
            EventSpec {
                name: "Chelsea vs TBC".into(),
                portals: vec![target("p1", CHELSEA_P1), target("ct", CHELSEA_CT)],
            },
            EventSpec {
                name: "Arsenal vs TBC".into(),
                portals: vec![target("p1", ARSENAL_P1), target("ct", ARSENAL_CT)],
            },
        ]
    }

    fn range() -> PriceRange {
        PriceRange {
            low: Decimal::from(100),
            high: Decimal::from(500),
        }
    }

    fn scraper(pages: Vec<(&str, Page)>, denied: Vec<&'static str>) -> PortalScraper {
        let fetcher = PageFetcher::new(
            Arc::new(DenyList(denied)),
            Arc::new(ScriptedRenderer::new(pages)),
            Duration::from_secs(3600),
        );
        PortalScraper::new(fetcher, PriceExtractor::new(Currency::Eur))
    }

    fn in_range_pages() -> Vec<(&'static str, Page)> {
        vec![
            (ARSENAL_P1, Page::Html("<body><p>From €120</p><p>€600</p></body>")),
            (ARSENAL_CT, Page::Html("<body><p>€90</p><p>€450</p></body>")),
            (CHELSEA_P1, Page::Html("<body>Sold out</body>")),
            (CHELSEA_CT, Page::Error("connection reset")),
        ]
    }

    fn window() -> AlertWindow {
        AlertWindow {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            timezone: chrono_tz::America::Los_Angeles,
        }
    }

    // 10:00 in Los Angeles
    fn in_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, 17, 0, 0).unwrap()
    }

    fn alert_coordinator(
        scraper: PortalScraper,
        db: &Database,
        notifier: Arc<RecordingNotifier>,
        cap: u32,
    ) -> RunCoordinator {
        RunCoordinator::new(
            scraper,
            GameAggregator::new(range()),
            events(),
            4,
            Duration::from_secs(30),
            Output::Alert {
                gate: AlertGate::new(Arc::new(db.clone()), window(), cap),
                notifier,
            },
        )
    }

    #[tokio::test]
    async fn qualifying_run_sends_and_counts() {
        let db = Database::in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::accepting());
        let coordinator =
            alert_coordinator(scraper(in_range_pages(), vec![]), &db, notifier.clone(), 10);

        let report = coordinator.run_once(in_window()).await.unwrap();

        assert_eq!(
            report.delivery,
            Delivery::Sent {
                notifier: "recording",
                alerts_sent_today: Some(1)
            }
        );
        assert_eq!(report.outcomes[0].event.name, "Arsenal vs TBC");
        assert_eq!(report.outcomes[0].state, OutcomeState::BothInRange);
        assert_eq!(report.outcomes[1].state, OutcomeState::NoneInRange);
        assert_eq!(report.failed_pages(), 1);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].outcomes.len(), 1);
        assert_eq!(sent[0].failed.len(), 2);
    }

    #[tokio::test]
    async fn failed_dispatch_does_not_consume_cap() {
        let db = Database::in_memory().await.unwrap();
        let failing = Arc::new(RecordingNotifier::failing());
        let coordinator =
            alert_coordinator(scraper(in_range_pages(), vec![]), &db, failing, 1);

        let report = coordinator.run_once(in_window()).await.unwrap();

        assert!(matches!(report.delivery, Delivery::DispatchFailed(_)));
        assert_eq!(db.load().await.unwrap(), None);

        // A later run the same day still gets the full cap of one
        let accepting = Arc::new(RecordingNotifier::accepting());
        let coordinator =
            alert_coordinator(scraper(in_range_pages(), vec![]), &db, accepting.clone(), 1);
        let report = coordinator.run_once(in_window()).await.unwrap();

        assert_eq!(
            report.delivery,
            Delivery::Sent {
                notifier: "recording",
                alerts_sent_today: Some(1)
            }
        );
        assert_eq!(accepting.sent_count(), 1);
    }

    /// Reads succeed, every counter update fails.
    struct ReadOnlyStore;

    #[async_trait::async_trait]
    impl AlertStateStore for ReadOnlyStore {
        async fn load(&self) -> Result<Option<AlertWindowState>> {
            Ok(None)
        }

        async fn record_send(
            &self,
            _today: NaiveDate,
            _cap: u32,
        ) -> Result<Option<AlertWindowState>> {
            Err(anyhow::anyhow!("database is locked"))
        }
    }

    #[tokio::test]
    async fn counter_failure_after_send_keeps_the_report() {
        let notifier = Arc::new(RecordingNotifier::accepting());
        let coordinator = RunCoordinator::new(
            scraper(in_range_pages(), vec![]),
            GameAggregator::new(range()),
            events(),
            4,
            Duration::from_secs(30),
            Output::Alert {
                gate: AlertGate::new(Arc::new(ReadOnlyStore), window(), 10),
                notifier: notifier.clone(),
            },
        );

        let report = coordinator.run_once(in_window()).await.unwrap();

        assert_eq!(
            report.delivery,
            Delivery::Sent {
                notifier: "recording",
                alerts_sent_today: None
            }
        );
        assert_eq!(
            report.delivery.to_string(),
            "alert sent via recording (counter update failed)"
        );
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn cap_and_window_suppress_without_sending() {
        let db = Database::in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::accepting());
        let coordinator =
            alert_coordinator(scraper(in_range_pages(), vec![]), &db, notifier.clone(), 1);

        // 05:00 in Los Angeles
        let early = Utc.with_ymd_and_hms(2026, 3, 16, 12, 0, 0).unwrap();
        let report = coordinator.run_once(early).await.unwrap();
        assert_eq!(report.delivery, Delivery::Suppressed(DenyReason::OutsideWindow));

        coordinator.run_once(in_window()).await.unwrap();
        let report = coordinator.run_once(in_window()).await.unwrap();
        assert_eq!(report.delivery, Delivery::Suppressed(DenyReason::CapReached));

        assert_eq!(notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn all_pages_failing_reports_no_qualifying_prices() {
        let db = Database::in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::accepting());
        let denied = vec![ARSENAL_P1, ARSENAL_CT, CHELSEA_P1, CHELSEA_CT];
        let coordinator = alert_coordinator(scraper(vec![], denied), &db, notifier.clone(), 10);

        let report = coordinator.run_once(in_window()).await.unwrap();

        assert_eq!(report.delivery, Delivery::NoQualifyingPrices);
        assert_eq!(report.failed_pages(), 4);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o.state, OutcomeState::Failed(_))));
        assert_eq!(notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn run_deadline_keeps_finished_pages_and_times_out_the_rest() {
        let db = Database::in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::accepting());
        let pages = vec![
            (ARSENAL_P1, Page::Html("<body>€200</body>")),
            (ARSENAL_CT, Page::Hang),
            (CHELSEA_P1, Page::Hang),
            (CHELSEA_CT, Page::Hang),
        ];
        let coordinator = RunCoordinator::new(
            scraper(pages, vec![]),
            GameAggregator::new(range()),
            events(),
            4,
            Duration::from_millis(300),
            Output::Alert {
                gate: AlertGate::new(Arc::new(db.clone()), window(), 10),
                notifier: notifier.clone(),
            },
        );

        let report = coordinator.run_once(in_window()).await.unwrap();

        let arsenal = &report.outcomes[0];
        assert_eq!(arsenal.state, OutcomeState::OneInRange(PortalId::new("p1")));
        assert_eq!(
            arsenal.results[&PortalId::new("ct")],
            PortalResult::Failed(FailureReason::Timeout)
        );
        assert_eq!(
            report.outcomes[1].state,
            OutcomeState::Failed(vec![PortalId::new("p1"), PortalId::new("ct")])
        );
        assert_eq!(notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_mode_writes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.json");
        let coordinator = RunCoordinator::new(
            scraper(in_range_pages(), vec![]),
            GameAggregator::new(range()),
            events(),
            2,
            Duration::from_secs(30),
            Output::Snapshot(SnapshotWriter::new(&path)),
        );

        let report = coordinator.run_once(in_window()).await.unwrap();

        assert_eq!(report.delivery, Delivery::SnapshotWritten { path: path.clone() });
        let snapshot: Snapshot =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[0].state, SnapshotState::BothInRange);
        assert_eq!(snapshot.events[1].state, SnapshotState::NoneInRange);
    }
}
