//! Drives fetch → diff → persist → notify cycles, once or on a randomized
//! schedule until shutdown.

use chrono::{DateTime, Utc};
use config::ConfigError;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{AppConfig, MonitoringConfig};
use crate::differ::{DiffReport, ListingDiffer};
use crate::fetcher::{HttpFetcher, ListingFetcher};
use crate::models::{
    EventKind, Listing, ListingDetails, ListingEvent, MonitoringRun, NewMonitoringRun, ParsedListing, RunStatus,
};
use crate::notifiers::{EmailNotifier, NotificationOutcome, Notifier};
use crate::store::{ListingStore, StoreStatistics};
use crate::utils::AppError;
use crate::Result;

/// Bounds for the randomized pause between cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollInterval {
    min: Duration,
    max: Duration,
}

impl PollInterval {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn from_config(config: &MonitoringConfig) -> Result<Self> {
        let minutes = |value: f64, name: &str| {
            Duration::try_from_secs_f64(value * 60.0).map_err(|e| {
                AppError::Config(ConfigError::Message(format!("Invalid monitoring {}: {}", name, e)))
            })
        };

        Ok(Self::new(
            minutes(config.min_interval_minutes, "min_interval_minutes")?,
            minutes(config.max_interval_minutes, "max_interval_minutes")?,
        ))
    }

    /// Uniform draw from `[min, max]`.
    pub fn pick<R: RngCore + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerState {
    pub cycles_run: u64,
    pub consecutive_failures: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
}

impl RunnerState {
    fn record(&mut self, status: RunStatus, at: DateTime<Utc>) {
        self.cycles_run += 1;
        self.last_run = Some(at);
        self.last_status = Some(status);
        if status == RunStatus::Success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub run: MonitoringRun,
    pub diff: Option<DiffReport>,
    pub notification: Option<NotificationOutcome>,
}

impl CycleReport {
    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn is_success(&self) -> bool {
        self.run.is_success()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelfTestReport {
    pub fetched: Option<usize>,
    pub fetch_error: Option<String>,
    pub statistics: Option<StoreStatistics>,
    pub smtp_connected: Option<bool>,
    pub sample_sent: Option<bool>,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.fetched.is_some()
            && self.statistics.is_some()
            && self.smtp_connected != Some(false)
            && self.sample_sent != Some(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub statistics: StoreStatistics,
    pub recent_listings: Vec<Listing>,
    pub recent_runs: Vec<MonitoringRun>,
}

pub struct Runner {
    fetcher: Box<dyn ListingFetcher>,
    store: ListingStore,
    notifier: Option<Box<dyn Notifier>>,
    interval: PollInterval,
    rng: StdRng,
    state: RunnerState,
}

impl Runner {
    pub fn new(
        fetcher: Box<dyn ListingFetcher>,
        store: ListingStore,
        notifier: Option<Box<dyn Notifier>>,
        interval: PollInterval,
        rng: StdRng,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            interval,
            rng,
            state: RunnerState::default(),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store = ListingStore::connect(&config.database).await?;
        let fetcher = HttpFetcher::new(&config.api, &config.search)?;

        let notifier: Option<Box<dyn Notifier>> = if config.notifications.enabled {
            Some(Box::new(EmailNotifier::new(&config.notifications)?))
        } else {
            info!("Notifications disabled");
            None
        };

        let rng = match config.monitoring.interval_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self::new(
            Box::new(fetcher),
            store,
            notifier,
            PollInterval::from_config(&config.monitoring)?,
            rng,
        ))
    }

    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    pub fn store(&self) -> &ListingStore {
        &self.store
    }

    /// One full cycle. Never returns an error: failures end up in the
    /// returned run, which is also recorded in the store.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Utc::now();
        info!("Starting monitoring cycle {}", self.state.cycles_run + 1);

        let report = match self.fetcher.fetch().await {
            Err(e) => {
                error!(kind = e.kind(), "Fetch failed: {}", e);
                CycleReport {
                    run: MonitoringRun::failed(e.to_string(), started),
                    diff: None,
                    notification: None,
                }
            }
            Ok(fetch) => match ListingDiffer::apply(&self.store, &fetch.listings).await {
                Err(e) => {
                    error!(kind = e.kind(), "Failed to apply fetched listings: {}", e);
                    let mut run = MonitoringRun::failed(e.to_string(), started);
                    run.listings_fetched = fetch.listings.len() as i64;
                    run.response_hash = Some(fetch.response_hash);
                    CycleReport {
                        run,
                        diff: None,
                        notification: None,
                    }
                }
                Ok(diff) => {
                    let (status, notification, error_message) = self.deliver(&diff).await;
                    let run = MonitoringRun::new(
                        NewMonitoringRun {
                            listings_fetched: diff.fetched,
                            new_listings: diff.new_listings,
                            price_drops: diff.price_drops,
                            removed_listings: diff.removed,
                            error_message,
                            response_hash: Some(fetch.response_hash),
                        },
                        status,
                        started,
                    );
                    CycleReport {
                        run,
                        diff: Some(diff),
                        notification,
                    }
                }
            },
        };

        if let Err(e) = self.store.record_run(&report.run).await {
            error!("Failed to record monitoring run: {}", e);
        }
        self.state.record(report.status(), started);

        info!(
            status = ?report.status(),
            "Cycle finished: {} fetched, {} new, {} price drops, {} removed",
            report.run.listings_fetched,
            report.run.new_listings,
            report.run.price_drops,
            report.run.removed_listings
        );

        report
    }

    /// Send this cycle's events together with alerts left undelivered by
    /// earlier cycles. Pending alerts are marked delivered only once the
    /// notifier reports the message as sent.
    async fn deliver(&self, diff: &DiffReport) -> (RunStatus, Option<NotificationOutcome>, Option<String>) {
        let pending = match self.store.pending_alerts().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Could not read pending alerts: {}", e);
                return (RunStatus::Partial, None, Some(e.to_string()));
            }
        };
        let pending_ids: Vec<String> = pending.iter().map(|listing| listing.id.clone()).collect();

        let Some(notifier) = &self.notifier else {
            self.close_alerts(&pending_ids).await;
            return (RunStatus::Success, None, None);
        };

        let events = alert_batch(&diff.events, pending);
        if events.is_empty() {
            return (RunStatus::Success, Some(NotificationOutcome::Skipped), None);
        }
        let carried = events.len().saturating_sub(diff.events.len());
        if carried > 0 {
            info!("Retrying {} alerts from earlier cycles", carried);
        }

        match notifier.notify(&events).await {
            Ok(outcome @ NotificationOutcome::Sent { .. }) => match self.close_alerts(&pending_ids).await {
                None => (RunStatus::Success, Some(outcome), None),
                Some(e) => (RunStatus::Partial, Some(outcome), Some(e)),
            },
            Ok(outcome) => (RunStatus::Success, Some(outcome), None),
            Err(e) => {
                warn!(channel = notifier.channel(), "Notification failed, changes are saved: {}", e);
                (RunStatus::Partial, None, Some(e.to_string()))
            }
        }
    }

    async fn close_alerts(&self, ids: &[String]) -> Option<String> {
        match self.store.mark_notified(ids, Utc::now()).await {
            Ok(_) => None,
            Err(e) => {
                error!("Could not mark alerts as delivered: {}", e);
                Some(e.to_string())
            }
        }
    }

    /// Single-shot mode.
    pub async fn run_once(&mut self) -> CycleReport {
        self.run_cycle().await
    }

    /// Continuous mode. Cycles until `shutdown` resolves; the pause between
    /// cycles is drawn from the poll interval and ends early on shutdown.
    pub async fn run_continuous<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Continuous monitoring every {:.1}-{:.1} minutes",
            self.interval.min().as_secs_f64() / 60.0,
            self.interval.max().as_secs_f64() / 60.0
        );

        loop {
            self.run_cycle().await;

            let delay = self.interval.pick(&mut self.rng);
            info!("Next check in {:.1} minutes", delay.as_secs_f64() / 60.0);

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested after {} cycles", self.state.cycles_run);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Fetch without persisting, read the store, check SMTP and send a
    /// sample alert.
    pub async fn self_test(&mut self) -> SelfTestReport {
        let mut report = SelfTestReport::default();

        let sample = match self.fetcher.fetch().await {
            Ok(fetch) => {
                info!("Fetch OK: {} listings", fetch.listings.len());
                report.fetched = Some(fetch.listings.len());
                fetch.listings.into_iter().next()
            }
            Err(e) => {
                error!("Fetch failed: {}", e);
                report.fetch_error = Some(e.to_string());
                None
            }
        };

        match self.store.statistics(Utc::now()).await {
            Ok(stats) => {
                info!("Store OK: {} listings, {} active", stats.total_listings, stats.active_listings);
                report.statistics = Some(stats);
            }
            Err(e) => error!("Store check failed: {}", e),
        }

        let Some(notifier) = &self.notifier else {
            info!("Notifications disabled, skipping SMTP checks");
            return report;
        };

        let connected = match notifier.test_connection().await {
            Ok(connected) => connected,
            Err(e) => {
                error!("SMTP connection failed: {}", e);
                false
            }
        };
        info!("SMTP connection: {}", if connected { "OK" } else { "FAILED" });
        report.smtp_connected = Some(connected);

        if connected {
            let event = ListingEvent::NewListing {
                listing: sample.unwrap_or_else(sample_listing),
            };
            let sent = match notifier.notify(&[event]).await {
                Ok(outcome) => matches!(outcome, NotificationOutcome::Sent { .. }),
                Err(e) => {
                    error!("Sample alert failed: {}", e);
                    false
                }
            };
            info!("Sample alert: {}", if sent { "sent" } else { "not sent" });
            report.sample_sent = Some(sent);
        }

        report
    }

    /// Log store statistics with the latest listings and runs.
    pub async fn stats_report(&self, limit: i64) -> Result<StatsReport> {
        let statistics = self.store.statistics(Utc::now()).await?;
        let recent_listings = self.store.recent_listings(limit).await?;
        let recent_runs = self.store.recent_runs(limit).await?;

        info!(
            "Listings: {} total, {} active, {} removed, {} new in 24h",
            statistics.total_listings,
            statistics.active_listings,
            statistics.removed_listings,
            statistics.new_last_24h
        );
        info!(
            "Runs in 24h: {}, avg {:.1} listings per run, {:.1}% successful",
            statistics.runs_last_24h, statistics.avg_listings_per_run, statistics.success_rate
        );
        for listing in &recent_listings {
            info!(
                "  {} | {} | {} rooms | {:?} | last seen {}",
                listing.display_name(),
                listing.price,
                listing.rooms,
                listing.status,
                listing.last_seen.format("%Y-%m-%d %H:%M")
            );
        }
        for run in &recent_runs {
            info!(
                "  {} | {:?} | {} fetched, {} events{}",
                run.run_at.format("%Y-%m-%d %H:%M"),
                run.status,
                run.listings_fetched,
                run.total_events(),
                run.error_message
                    .as_deref()
                    .map(|e| format!(" | {}", e))
                    .unwrap_or_default()
            );
        }

        Ok(StatsReport {
            statistics,
            recent_listings,
            recent_runs,
        })
    }
}

/// This cycle's new-listing and price-drop events, then alerts still owed
/// from earlier cycles, then removals. Stored alert state wins over the
/// cycle's event for the same listing, so a drop reports the last price the
/// recipients were told about.
fn alert_batch(cycle_events: &[ListingEvent], pending: Vec<Listing>) -> Vec<ListingEvent> {
    let mut owed: Vec<ListingEvent> = pending.into_iter().filter_map(ListingEvent::pending).collect();
    let mut batch = Vec::with_capacity(cycle_events.len() + owed.len());

    for event in cycle_events.iter().filter(|e| e.kind() != EventKind::Removed) {
        match owed.iter().position(|o| o.listing_id() == event.listing_id()) {
            Some(index) => batch.push(owed.remove(index)),
            None => batch.push(event.clone()),
        }
    }
    batch.extend(owed);
    batch.extend(cycle_events.iter().filter(|e| e.kind() == EventKind::Removed).cloned());

    batch
}

fn sample_listing() -> Listing {
    Listing::observed(
        ParsedListing {
            id: "self-test".to_string(),
            price: 4500,
            rooms: 3.0,
            url: "https://example.com/self-test".to_string(),
            address: Some("Self-test listing".to_string()),
            details: ListingDetails::default(),
            raw: serde_json::json!({}),
        },
        Utc::now(),
    )
}
