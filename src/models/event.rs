use serde::{Deserialize, Serialize};

use crate::models::Listing;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewListing,
    PriceDrop,
    Removed,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::NewListing, EventKind::PriceDrop, EventKind::Removed];

    pub fn title(&self) -> &'static str {
        match self {
            EventKind::NewListing => "New listings",
            EventKind::PriceDrop => "Price drops",
            EventKind::Removed => "No longer listed",
        }
    }
}

/// A classified change produced by comparing a fetch against the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListingEvent {
    NewListing { listing: Listing },
    PriceDrop { listing: Listing, old_price: i64, new_price: i64 },
    Removed { listing: Listing },
}

impl ListingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ListingEvent::NewListing { .. } => EventKind::NewListing,
            ListingEvent::PriceDrop { .. } => EventKind::PriceDrop,
            ListingEvent::Removed { .. } => EventKind::Removed,
        }
    }

    pub fn listing(&self) -> &Listing {
        match self {
            ListingEvent::NewListing { listing }
            | ListingEvent::PriceDrop { listing, .. }
            | ListingEvent::Removed { listing } => listing,
        }
    }

    pub fn listing_id(&self) -> &str {
        &self.listing().id
    }

    /// Rebuild the alert still owed for a stored listing, if any.
    pub fn pending(listing: Listing) -> Option<ListingEvent> {
        if listing.is_notified() || !listing.is_active() {
            return None;
        }

        match listing.previous_price {
            Some(old_price) if old_price > listing.price => Some(ListingEvent::PriceDrop {
                new_price: listing.price,
                old_price,
                listing,
            }),
            _ => Some(ListingEvent::NewListing { listing }),
        }
    }
}
