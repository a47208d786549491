//! Deal persistence.
//!
//! Duplicate-key conflicts are expected under re-runs and concurrent
//! same-address jobs: they are logged and skipped per row, never failing
//! the batch. Any other failure aborts the current page's persistence and
//! surfaces as the job's error; earlier pages are already committed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use dealscope_common::{Deal, DealscopeError, TrendSnapshot};

#[async_trait]
pub trait DealStore: Send + Sync {
    /// Insert a page of deals. Returns the number actually inserted
    /// (duplicates are skipped). No-op on empty input.
    async fn insert_deals(&self, deals: &[Deal]) -> Result<u32>;

    /// Last-write-wins upsert keyed on the external address id.
    async fn upsert_trend_snapshot(&self, address_id: &str, snapshot: &TrendSnapshot)
        -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgDealStore {
    pool: PgPool,
}

impl PgDealStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Create tables and the natural-key index if they do not exist.
    /// NULLs in the key are distinct under Postgres unique indexes, so
    /// rows missing part of the key are stored without conflict
    /// protection.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deals (
                id BIGSERIAL PRIMARY KEY,
                city_name TEXT NOT NULL,
                serial_no INTEGER NOT NULL,
                address TEXT,
                area_m2 DOUBLE PRECISION,
                deal_date TEXT,
                price_nis DOUBLE PRECISION,
                block_parcel_subparcel TEXT,
                floor TEXT,
                property_type TEXT,
                rooms DOUBLE PRECISION,
                trend TEXT,
                source_url TEXT NOT NULL,
                raw JSONB NOT NULL,
                scraped_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS deals_natural_key
                ON deals (block_parcel_subparcel, deal_date, price_nis)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trend_snapshots (
                address_id TEXT PRIMARY KEY,
                snapshot JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Deal store schema ready");
        Ok(())
    }
}

fn natural_key(deal: &Deal) -> String {
    format!(
        "{}|{}|{}",
        deal.block_parcel_subparcel.as_deref().unwrap_or("-"),
        deal.deal_date.as_deref().unwrap_or("-"),
        deal.price_nis.map_or("-".to_string(), |p| p.to_string()),
    )
}

fn classify_insert_error(e: sqlx::Error, deal: &Deal) -> DealscopeError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return DealscopeError::DuplicateDeal(natural_key(deal));
        }
    }
    DealscopeError::Store(e.to_string())
}

#[async_trait]
impl DealStore for PgDealStore {
    async fn insert_deals(&self, deals: &[Deal]) -> Result<u32> {
        if deals.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0u32;
        for deal in deals {
            let result = sqlx::query(
                r#"
                INSERT INTO deals (
                    city_name, serial_no, address, area_m2, deal_date,
                    price_nis, block_parcel_subparcel, floor, property_type,
                    rooms, trend, source_url, raw
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(&deal.city_name)
            .bind(deal.serial_no as i32)
            .bind(&deal.address)
            .bind(deal.area_m2)
            .bind(&deal.deal_date)
            .bind(deal.price_nis)
            .bind(&deal.block_parcel_subparcel)
            .bind(&deal.floor)
            .bind(&deal.property_type)
            .bind(deal.rooms)
            .bind(&deal.trend)
            .bind(&deal.source_url)
            .bind(&deal.raw)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => inserted += 1,
                Err(e) => match classify_insert_error(e, deal) {
                    DealscopeError::DuplicateDeal(key) => {
                        warn!(key, "Duplicate deal skipped");
                    }
                    other => {
                        return Err(other)
                            .with_context(|| format!("Insert aborted at serial {}", deal.serial_no));
                    }
                },
            }
        }
        Ok(inserted)
    }

    async fn upsert_trend_snapshot(
        &self,
        address_id: &str,
        snapshot: &TrendSnapshot,
    ) -> Result<()> {
        let value = serde_json::to_value(snapshot).context("Snapshot serialization failed")?;
        sqlx::query(
            r#"
            INSERT INTO trend_snapshots (address_id, snapshot, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (address_id)
            DO UPDATE SET snapshot = EXCLUDED.snapshot, updated_at = now()
            "#,
        )
        .bind(address_id)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Trend snapshot upsert failed")?;
        Ok(())
    }
}
