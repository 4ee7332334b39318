pub mod config;
pub mod differ;
pub mod fetcher;
pub mod models;
pub mod notifiers;
pub mod runner;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use crate::config::AppConfig;
pub use differ::{DiffReport, ListingDiffer};
pub use fetcher::{FetchOutcome, HeaderRotation, HttpFetcher, ListingFetcher};
pub use models::{EventKind, Listing, ListingDetails, ListingEvent, ListingStatus, MonitoringRun, RunStatus};
pub use notifiers::{EmailNotifier, NotificationOutcome, Notifier};
pub use runner::{CycleReport, PollInterval, Runner, RunnerState, SelfTestReport, StatsReport};
pub use store::{ListingStore, StoreStatistics};
pub use utils::error::{AppError, Result};
