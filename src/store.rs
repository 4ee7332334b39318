//! SQLite record of observed listings and monitoring runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::Transaction;
use std::str::FromStr;

use crate::config::DatabaseConfig;
use crate::models::{Listing, ListingStatus, MonitoringRun, RunStatus};
use crate::Result;

const LISTING_COLUMNS: &str = "id, price, rooms, url, address, size_sqm, floor, property_type, condition, image_url, raw_data, status, first_seen, last_seen, notified_at, previous_price";

const RUN_COLUMNS: &str = "id, run_at, listings_fetched, new_listings, price_drops, removed_listings, status, error_message, response_hash";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreStatistics {
    pub total_listings: i64,
    pub active_listings: i64,
    pub removed_listings: i64,
    pub new_last_24h: i64,
    pub runs_last_24h: i64,
    pub avg_listings_per_run: f64,
    /// Percentage of runs in the last 24h that fully succeeded.
    pub success_rate: f64,
}

/// Durable listing store.
///
/// Timestamps are stored as RFC 3339 text in UTC, so text comparison and
/// ordering follow time order. The `*_in` functions run on a caller-owned
/// connection or transaction so several writes can commit together.
#[derive(Clone)]
pub struct ListingStore {
    pool: SqlitePool,
}

impl ListingStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::open(
            &config.url,
            config.max_connections,
            std::time::Duration::from_secs(config.acquire_timeout),
        )
        .await
    }

    /// Open a store with default pool settings; used by tools and tests.
    pub async fn connect_url(database_url: &str) -> Result<Self> {
        Self::open(database_url, 1, std::time::Duration::from_secs(30)).await
    }

    async fn open(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
    ) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is a separate database, so pin one.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = pool_options
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("Listing store ready at {}", database_url);

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction for use with the `*_in` functions.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Listing>> {
        let listing = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {} FROM listings WHERE id = ?",
            LISTING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(listing)
    }

    /// Insert or overwrite a listing. `first_seen` of an existing row is kept.
    pub async fn upsert(&self, listing: &Listing) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_in(&mut conn, listing).await
    }

    pub async fn upsert_in(conn: &mut SqliteConnection, listing: &Listing) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO listings ({})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                price = excluded.price,
                rooms = excluded.rooms,
                url = excluded.url,
                address = excluded.address,
                size_sqm = excluded.size_sqm,
                floor = excluded.floor,
                property_type = excluded.property_type,
                condition = excluded.condition,
                image_url = excluded.image_url,
                raw_data = excluded.raw_data,
                status = excluded.status,
                last_seen = excluded.last_seen,
                notified_at = excluded.notified_at,
                previous_price = excluded.previous_price
            "#,
            LISTING_COLUMNS
        ))
        .bind(&listing.id)
        .bind(listing.price)
        .bind(listing.rooms)
        .bind(&listing.url)
        .bind(&listing.address)
        .bind(listing.details.size_sqm)
        .bind(&listing.details.floor)
        .bind(&listing.details.property_type)
        .bind(&listing.details.condition)
        .bind(&listing.details.image_url)
        .bind(&listing.raw_data)
        .bind(listing.status)
        .bind(listing.first_seen)
        .bind(listing.last_seen)
        .bind(listing.notified_at)
        .bind(listing.previous_price)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Mark the given listings removed. Only active rows change; the number
    /// of rows actually flipped is returned.
    pub async fn mark_removed(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let affected = Self::mark_removed_in(&mut tx, ids).await?;
        tx.commit().await?;

        Ok(affected)
    }

    pub async fn mark_removed_in(conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let mut affected = 0;
        for id in ids {
            affected += sqlx::query("UPDATE listings SET status = ? WHERE id = ? AND status = ?")
                .bind(ListingStatus::Removed)
                .bind(id)
                .bind(ListingStatus::Active)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }

        Ok(affected)
    }

    /// Active listings whose new-listing or price-drop alert has not been
    /// delivered yet, oldest first.
    pub async fn pending_alerts(&self) -> Result<Vec<Listing>> {
        let listings = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {} FROM listings WHERE status = ? AND notified_at IS NULL ORDER BY first_seen, id",
            LISTING_COLUMNS
        ))
        .bind(ListingStatus::Active)
        .fetch_all(&self.pool)
        .await?;

        Ok(listings)
    }

    /// Record delivery of the pending alerts for `ids`.
    pub async fn mark_notified(&self, ids: &[String], at: DateTime<Utc>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for id in ids {
            affected += sqlx::query(
                "UPDATE listings SET notified_at = ?, previous_price = NULL WHERE id = ? AND notified_at IS NULL",
            )
            .bind(at)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        Ok(affected)
    }

    pub async fn active_listings(&self) -> Result<Vec<Listing>> {
        let mut conn = self.pool.acquire().await?;
        Self::active_listings_in(&mut conn).await
    }

    pub async fn active_listings_in(conn: &mut SqliteConnection) -> Result<Vec<Listing>> {
        let listings = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {} FROM listings WHERE status = ? ORDER BY id",
            LISTING_COLUMNS
        ))
        .bind(ListingStatus::Active)
        .fetch_all(&mut *conn)
        .await?;

        Ok(listings)
    }

    pub async fn recent_listings(&self, limit: i64) -> Result<Vec<Listing>> {
        let listings = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {} FROM listings ORDER BY last_seen DESC, id LIMIT ?",
            LISTING_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(listings)
    }

    pub async fn record_run(&self, run: &MonitoringRun) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO monitoring_runs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RUN_COLUMNS
        ))
        .bind(&run.id)
        .bind(run.run_at)
        .bind(run.listings_fetched)
        .bind(run.new_listings)
        .bind(run.price_drops)
        .bind(run.removed_listings)
        .bind(run.status)
        .bind(&run.error_message)
        .bind(&run.response_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<MonitoringRun>> {
        let runs = sqlx::query_as::<_, MonitoringRun>(&format!(
            "SELECT {} FROM monitoring_runs ORDER BY run_at DESC LIMIT ?",
            RUN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }

    pub async fn statistics(&self, now: DateTime<Utc>) -> Result<StoreStatistics> {
        let since = now - Duration::hours(24);

        let (total_listings, active_listings): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = ? THEN 1 ELSE 0 END), 0) FROM listings",
        )
        .bind(ListingStatus::Active)
        .fetch_one(&self.pool)
        .await?;

        let (new_last_24h,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM listings WHERE first_seen >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;

        let (runs_last_24h, avg_listings_per_run, successful_runs): (i64, f64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(AVG(listings_fetched), 0.0),
                    COALESCE(SUM(CASE WHEN status = ? THEN 1 ELSE 0 END), 0)
                FROM monitoring_runs
                WHERE run_at >= ?
                "#,
            )
            .bind(RunStatus::Success)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        let success_rate = if runs_last_24h > 0 {
            successful_runs as f64 / runs_last_24h as f64 * 100.0
        } else {
            0.0
        };

        Ok(StoreStatistics {
            total_listings,
            active_listings,
            removed_listings: total_listings - active_listings,
            new_last_24h,
            runs_last_24h,
            avg_listings_per_run,
            success_rate,
        })
    }
}
