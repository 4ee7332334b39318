use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod event;
pub mod listing;
pub mod monitoring_run;

// Re-exports for convenience
pub use event::*;
pub use listing::*;
pub use monitoring_run::*;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    #[sqlx(rename = "active")]
    Active,
    #[sqlx(rename = "removed")]
    Removed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[sqlx(rename = "success")]
    Success,
    /// Store updated, notification delivery failed.
    #[sqlx(rename = "partial")]
    Partial,
    #[sqlx(rename = "failed")]
    Failed,
}

// Helper function to generate UUIDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
