use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::ListingStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Listing {
    pub id: String,
    pub price: i64,
    pub rooms: f64,
    pub url: String,
    pub address: Option<String>,
    #[sqlx(flatten)]
    pub details: ListingDetails,

    // Opaque listing object as returned by the API
    pub raw_data: String,

    pub status: ListingStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    /// Unset while a new-listing or price-drop alert has not been delivered.
    pub notified_at: Option<DateTime<Utc>>,
    /// Price before a drop whose alert is still pending.
    pub previous_price: Option<i64>,
}

/// Optional attributes shown in alerts when the feed provides them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ListingDetails {
    pub size_sqm: Option<f64>,
    pub floor: Option<String>,
    pub property_type: Option<String>,
    pub condition: Option<String>,
    pub image_url: Option<String>,
}

/// A listing as parsed from one API response, before it meets the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedListing {
    pub id: String,
    pub price: i64,
    pub rooms: f64,
    pub url: String,
    pub address: Option<String>,
    pub details: ListingDetails,
    pub raw: serde_json::Value,
}

impl ListingDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl Listing {
    pub fn observed(parsed: ParsedListing, seen_at: DateTime<Utc>) -> Self {
        Self {
            id: parsed.id,
            price: parsed.price,
            rooms: parsed.rooms,
            url: parsed.url,
            address: parsed.address,
            details: parsed.details,
            raw_data: parsed.raw.to_string(),
            status: ListingStatus::Active,
            first_seen: seen_at,
            last_seen: seen_at,
            notified_at: None,
            previous_price: None,
        }
    }

    pub fn raw_attributes(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.raw_data)
    }

    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    pub fn is_notified(&self) -> bool {
        self.notified_at.is_some()
    }

    /// Address when known, otherwise the listing id.
    pub fn display_name(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.id)
    }
}
