use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{generate_id, RunStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct MonitoringRun {
    pub id: String,
    pub run_at: DateTime<Utc>,
    pub listings_fetched: i64,
    pub new_listings: i64,
    pub price_drops: i64,
    pub removed_listings: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub response_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMonitoringRun {
    pub listings_fetched: usize,
    pub new_listings: usize,
    pub price_drops: usize,
    pub removed_listings: usize,
    pub error_message: Option<String>,
    pub response_hash: Option<String>,
}

impl MonitoringRun {
    pub fn new(new_run: NewMonitoringRun, status: RunStatus, run_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            run_at,
            listings_fetched: new_run.listings_fetched as i64,
            new_listings: new_run.new_listings as i64,
            price_drops: new_run.price_drops as i64,
            removed_listings: new_run.removed_listings as i64,
            status,
            error_message: new_run.error_message,
            response_hash: new_run.response_hash,
        }
    }

    pub fn failed(error: impl Into<String>, run_at: DateTime<Utc>) -> Self {
        Self::new(
            NewMonitoringRun {
                error_message: Some(error.into()),
                ..Default::default()
            },
            RunStatus::Failed,
            run_at,
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn total_events(&self) -> i64 {
        self.new_listings + self.price_drops + self.removed_listings
    }
}
