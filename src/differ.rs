use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::models::{EventKind, Listing, ListingEvent, ListingStatus};
use crate::store::ListingStore;
use crate::Result;

/// Outcome of applying one fetched batch to the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffReport {
    pub events: Vec<ListingEvent>,
    pub fetched: usize,
    pub new_listings: usize,
    pub price_drops: usize,
    pub removed: usize,
}

impl DiffReport {
    pub fn from_events(events: Vec<ListingEvent>, fetched: usize) -> Self {
        let count = |kind: EventKind| events.iter().filter(|e| e.kind() == kind).count();
        Self {
            fetched,
            new_listings: count(EventKind::NewListing),
            price_drops: count(EventKind::PriceDrop),
            removed: count(EventKind::Removed),
            events,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub struct ListingDiffer;

impl ListingDiffer {
    /// Compare a fetched batch against the currently active listings.
    ///
    /// Fetched listings are visited in order, first occurrence per id only.
    /// Listings that were active and are missing from the batch follow as
    /// `Removed` events, sorted by id. Higher prices produce no event.
    pub fn classify(fetched: &[Listing], active: &HashMap<String, Listing>) -> Vec<ListingEvent> {
        let mut events = Vec::new();
        let mut seen = HashSet::new();

        for listing in fetched {
            if !seen.insert(listing.id.as_str()) {
                continue;
            }

            match active.get(&listing.id) {
                None => events.push(ListingEvent::NewListing {
                    listing: listing.clone(),
                }),
                Some(previous) if listing.price < previous.price => {
                    let mut current = listing.clone();
                    current.first_seen = previous.first_seen;
                    events.push(ListingEvent::PriceDrop {
                        listing: current,
                        old_price: previous.price,
                        new_price: listing.price,
                    });
                }
                Some(_) => {}
            }
        }

        let mut missing: Vec<&Listing> = active
            .values()
            .filter(|listing| !seen.contains(listing.id.as_str()))
            .collect();
        missing.sort_by(|a, b| a.id.cmp(&b.id));

        events.extend(missing.into_iter().map(|listing| {
            let mut removed = listing.clone();
            removed.status = ListingStatus::Removed;
            ListingEvent::Removed { listing: removed }
        }));

        events
    }

    /// Classify against the store and persist the batch in one transaction:
    /// every fetched listing is upserted and every vanished one is marked
    /// removed. On error nothing is written.
    pub async fn apply(store: &ListingStore, fetched: &[Listing]) -> Result<DiffReport> {
        let mut tx = store.begin().await?;

        let active: HashMap<String, Listing> = ListingStore::active_listings_in(&mut tx)
            .await?
            .into_iter()
            .map(|listing| (listing.id.clone(), listing))
            .collect();

        let events = Self::classify(fetched, &active);

        let mut seen = HashSet::new();
        for listing in fetched {
            if seen.insert(listing.id.as_str()) {
                let row = Self::carry_alert_state(listing, active.get(&listing.id));
                ListingStore::upsert_in(&mut tx, &row).await?;
            }
        }

        let removed_ids: Vec<String> = events
            .iter()
            .filter(|event| event.kind() == EventKind::Removed)
            .map(|event| event.listing_id().to_string())
            .collect();
        let flipped = ListingStore::mark_removed_in(&mut tx, &removed_ids).await?;
        tx.commit().await?;
        debug!("Marked {} listings removed", flipped);

        let report = DiffReport::from_events(events, seen.len());
        info!(
            "Diff: {} fetched, {} new, {} price drops, {} removed",
            report.fetched, report.new_listings, report.price_drops, report.removed
        );

        Ok(report)
    }

    /// Row to store for a fetched listing, keeping track of the alert it
    /// still owes. New listings start un-notified. A drop reopens the alert
    /// and remembers the last notified price; a later rise that undoes an
    /// undelivered drop closes it again.
    fn carry_alert_state(fetched: &Listing, previous: Option<&Listing>) -> Listing {
        let mut row = fetched.clone();
        let Some(previous) = previous else {
            return row;
        };

        row.first_seen = previous.first_seen;
        if fetched.price < previous.price {
            row.notified_at = None;
            row.previous_price = if previous.is_notified() {
                Some(previous.price)
            } else {
                previous.previous_price
            };
        } else if matches!(previous.previous_price, Some(old) if old <= fetched.price) {
            row.notified_at = Some(fetched.last_seen);
            row.previous_price = None;
        } else {
            row.notified_at = previous.notified_at;
            row.previous_price = previous.previous_price;
        }

        row
    }
}
