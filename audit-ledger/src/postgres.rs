//! PostgreSQL ledger backend

use crate::entry::AuditEntry;
use crate::store::{check_continuation, LedgerQuery, LedgerStore};
use crate::tax::TaxLot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

type EntryRow = (
    i64,
    Uuid,
    DateTime<Utc>,
    String,
    String,
    String,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
    String,
    String,
);

type LotRow = (
    Uuid,
    String,
    DateTime<Utc>,
    Decimal,
    Decimal,
    String,
    Option<DateTime<Utc>>,
    Option<Decimal>,
);

const ENTRY_COLUMNS: &str = "sequence, id, timestamp, entity_type, entity_id, action, \
                             old_value, new_value, previous_checksum, checksum";

/// Ledger store backed by PostgreSQL
pub struct PostgresLedgerStore {
    db_pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to ledger database")?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Create ledger tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                sequence BIGINT PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                timestamp TIMESTAMPTZ NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                old_value JSONB,
                new_value JSONB,
                previous_checksum TEXT NOT NULL,
                checksum TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tax_lots (
                id UUID PRIMARY KEY,
                asset TEXT NOT NULL,
                acquired_at TIMESTAMPTZ NOT NULL,
                quantity NUMERIC NOT NULL,
                cost_basis NUMERIC NOT NULL,
                exchange TEXT NOT NULL,
                disposed_at TIMESTAMPTZ,
                proceeds NUMERIC
            );

            CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_entries(entity_type, entity_id);
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_entries(action);
            CREATE INDEX IF NOT EXISTS idx_tax_lots_asset ON tax_lots(asset);
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create ledger tables")?;

        info!("Ledger tables initialized");
        Ok(())
    }
}

fn entry_from_row(row: EntryRow) -> Result<AuditEntry> {
    let (sequence, id, timestamp, entity_type, entity_id, action, old_value, new_value, previous, checksum) = row;
    Ok(AuditEntry {
        sequence: u64::try_from(sequence).context("Negative ledger sequence")?,
        id,
        timestamp,
        entity_type: entity_type.parse()?,
        entity_id,
        action: action.parse()?,
        old_value,
        new_value,
        previous_checksum: previous,
        checksum,
    })
}

fn lot_from_row(row: LotRow) -> TaxLot {
    let (id, asset, acquired_at, quantity, cost_basis, exchange, disposed_at, proceeds) = row;
    TaxLot {
        id,
        asset,
        acquired_at,
        quantity,
        cost_basis,
        exchange,
        disposed_at,
        proceeds,
    }
}

fn to_i64(sequence: u64) -> Result<i64> {
    i64::try_from(sequence).context("Ledger sequence out of range")
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn head(&self) -> Result<Option<AuditEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM audit_entries ORDER BY sequence DESC LIMIT 1",
            ENTRY_COLUMNS
        ))
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to read ledger head")?;

        row.map(entry_from_row).transpose()
    }

    async fn append(&self, entries: &[AuditEntry]) -> Result<()> {
        let mut tx = self.db_pool.begin().await.context("Failed to begin ledger transaction")?;

        sqlx::query("LOCK TABLE audit_entries IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .context("Failed to lock ledger")?;

        let head = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM audit_entries ORDER BY sequence DESC LIMIT 1",
            ENTRY_COLUMNS
        ))
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read ledger head")?
        .map(entry_from_row)
        .transpose()?;
        check_continuation(head.as_ref(), entries)?;

        for entry in entries {
            sqlx::query(&format!(
                "INSERT INTO audit_entries ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                ENTRY_COLUMNS
            ))
            .bind(to_i64(entry.sequence)?)
            .bind(entry.id)
            .bind(entry.timestamp)
            .bind(entry.entity_type.as_str())
            .bind(&entry.entity_id)
            .bind(entry.action.as_str())
            .bind(&entry.old_value)
            .bind(&entry.new_value)
            .bind(&entry.previous_checksum)
            .bind(&entry.checksum)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert ledger entry {}", entry.sequence))?;
        }

        tx.commit().await.context("Failed to commit ledger entries")?;
        Ok(())
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<AuditEntry>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM audit_entries WHERE TRUE", ENTRY_COLUMNS));

        if let Some(entity_type) = query.entity_type {
            builder.push(" AND entity_type = ").push_bind(entity_type.as_str());
        }
        if let Some(entity_id) = &query.entity_id {
            builder.push(" AND entity_id = ").push_bind(entity_id.clone());
        }
        if let Some(action) = query.action {
            builder.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(from) = query.from_sequence {
            builder.push(" AND sequence >= ").push_bind(to_i64(from)?);
        }
        if let Some(to) = query.to_sequence {
            builder.push(" AND sequence <= ").push_bind(to_i64(to)?);
        }
        builder.push(" ORDER BY sequence ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build_query_as::<EntryRow>()
            .fetch_all(self.db_pool.as_ref())
            .await
            .context("Failed to query ledger")?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_entries")
            .fetch_one(self.db_pool.as_ref())
            .await
            .context("Failed to count ledger entries")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn save_lots(&self, lots: &[TaxLot]) -> Result<()> {
        let mut tx = self.db_pool.begin().await.context("Failed to begin lot transaction")?;
        for lot in lots {
            sqlx::query(
                r#"
                INSERT INTO tax_lots (id, asset, acquired_at, quantity, cost_basis, exchange, disposed_at, proceeds)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE SET
                    quantity = EXCLUDED.quantity,
                    cost_basis = EXCLUDED.cost_basis,
                    disposed_at = EXCLUDED.disposed_at,
                    proceeds = EXCLUDED.proceeds
                "#,
            )
            .bind(lot.id)
            .bind(&lot.asset)
            .bind(lot.acquired_at)
            .bind(lot.quantity)
            .bind(lot.cost_basis)
            .bind(&lot.exchange)
            .bind(lot.disposed_at)
            .bind(lot.proceeds)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save tax lot {}", lot.id))?;
        }
        tx.commit().await.context("Failed to commit tax lots")?;
        Ok(())
    }

    async fn load_lots(&self) -> Result<Vec<TaxLot>> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT id, asset, acquired_at, quantity, cost_basis, exchange, disposed_at, proceeds
            FROM tax_lots
            ORDER BY acquired_at ASC, id ASC
            "#,
        )
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to load tax lots")?;

        Ok(rows.into_iter().map(lot_from_row).collect())
    }
}

