//! Postgres-backed ledger store.
//!
//! Persists fiscal documents in PostgreSQL with pessimistic locking: the
//! original row is taken `FOR UPDATE`, and each numbering partition owns a
//! lock row in `fiscal_partitions` that serializes allocation and chain-head
//! reads across concurrent operations.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Partition number backstop hit (should be unreachable under the partition lock) |
//! | Database (lock not available) | `55P03` | `Conflict` | Lock wait timed out under a configured `lock_timeout` |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Concurrent operations deadlocked; the caller may retry |
//! | Database (other) | Any other | `Backend` | Constraint/storage errors |
//! | Other | N/A | `Backend` | Network errors, pool closed, etc. |
//!
//! ## Schema
//!
//! `ensure_schema` bootstraps the tables on startup (idempotent); deployments
//! with managed migrations can skip it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use fiscalchain_core::{DocumentId, SchemeId, StoreId, UserId};
use fiscalchain_ledger::{
    ChainPayload, CorrectionType, DocumentKind, DocumentStatus, FiscalDocument, NewFiscalDocument,
    PartitionKey,
};

use super::r#trait::{LedgerStore, LedgerTx, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS stores (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        tax_id TEXT NOT NULL,
        invoice_prefix TEXT NOT NULL,
        default_vat_rate NUMERIC(5,2) NOT NULL DEFAULT 10.00,
        billing_system TEXT,
        deleted_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fiscal_documents (
        id BIGSERIAL PRIMARY KEY,
        external_uuid UUID NOT NULL UNIQUE,
        store_id BIGINT NOT NULL,
        user_id BIGINT NOT NULL,
        issuer_tax_id TEXT NOT NULL,
        series TEXT NOT NULL,
        number BIGINT NOT NULL CHECK (number > 0),
        issued_at TIMESTAMPTZ NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'issued',
        cancellation_reason TEXT,
        correction_type TEXT,
        references_document_id BIGINT REFERENCES fiscal_documents(id),
        scheme TEXT NOT NULL,
        chain_payload JSONB NOT NULL,
        taxable_base NUMERIC(12,2) NOT NULL,
        tax_amount NUMERIC(12,2) NOT NULL,
        final_total NUMERIC(12,2) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS fiscal_documents_partition_number
        ON fiscal_documents (scheme, series, issuer_tax_id, number)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS fiscal_documents_partition
        ON fiscal_documents (scheme, series, issuer_tax_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fiscal_partitions (
        scheme TEXT NOT NULL,
        series TEXT NOT NULL,
        issuer_tax_id TEXT NOT NULL,
        PRIMARY KEY (scheme, series, issuer_tax_id)
    )
    "#,
];

/// Postgres-backed ledger store.
///
/// Cloneable handle over a connection pool; all writes go through
/// [`PgLedgerTx`] transactions.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: Arc<PgPool>,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the ledger tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(document_id = %id), err)]
    async fn fetch_document(&self, id: DocumentId) -> Result<Option<FiscalDocument>, StoreError> {
        let row = sqlx::query(&select_documents_sql("WHERE id = $1", ""))
            .bind(id.as_i64())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_document", e))?;

        row.map(|row| document_from_row(&row)).transpose()
    }

    #[instrument(skip(self), fields(external_uuid = %uuid), err)]
    async fn fetch_document_by_uuid(
        &self,
        uuid: Uuid,
    ) -> Result<Option<FiscalDocument>, StoreError> {
        let row = sqlx::query(&select_documents_sql("WHERE external_uuid = $1", ""))
            .bind(uuid)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_document_by_uuid", e))?;

        row.map(|row| document_from_row(&row)).transpose()
    }

    #[instrument(skip(self), fields(partition = %partition), err)]
    async fn fetch_partition_documents(
        &self,
        partition: &PartitionKey,
    ) -> Result<Vec<FiscalDocument>, StoreError> {
        let rows = sqlx::query(&select_documents_sql(
            "WHERE scheme = $1 AND series = $2 AND issuer_tax_id = $3",
            "ORDER BY number ASC",
        ))
        .bind(partition.scheme.as_str())
        .bind(&partition.series)
        .bind(&partition.issuer_tax_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_partition_documents", e))?;

        rows.iter().map(document_from_row).collect()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgLedgerTx { tx })
    }

    async fn document(&self, id: DocumentId) -> Result<Option<FiscalDocument>, StoreError> {
        self.fetch_document(id).await
    }

    async fn document_by_uuid(&self, uuid: Uuid) -> Result<Option<FiscalDocument>, StoreError> {
        self.fetch_document_by_uuid(uuid).await
    }

    async fn partition_documents(
        &self,
        partition: &PartitionKey,
    ) -> Result<Vec<FiscalDocument>, StoreError> {
        self.fetch_partition_documents(partition).await
    }
}

/// One open Postgres transaction over the ledger.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_document(
        &mut self,
        id: DocumentId,
    ) -> Result<Option<FiscalDocument>, StoreError> {
        let row = sqlx::query(&select_documents_sql("WHERE id = $1", "FOR UPDATE"))
            .bind(id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_document", e))?;

        row.map(|row| document_from_row(&row)).transpose()
    }

    async fn lock_partition(&mut self, partition: &PartitionKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fiscal_partitions (scheme, series, issuer_tax_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (scheme, series, issuer_tax_id) DO NOTHING
            "#,
        )
        .bind(partition.scheme.as_str())
        .bind(&partition.series)
        .bind(&partition.issuer_tax_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_partition_row", e))?;

        sqlx::query(
            r#"
            SELECT scheme
            FROM fiscal_partitions
            WHERE scheme = $1 AND series = $2 AND issuer_tax_id = $3
            FOR UPDATE
            "#,
        )
        .bind(partition.scheme.as_str())
        .bind(&partition.series)
        .bind(&partition.issuer_tax_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_partition", e))?;

        Ok(())
    }

    async fn latest_chain_hash(
        &mut self,
        partition: &PartitionKey,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT chain_payload->>'hash' AS hash
            FROM fiscal_documents
            WHERE scheme = $1 AND series = $2 AND issuer_tax_id = $3
            ORDER BY number DESC
            LIMIT 1
            "#,
        )
        .bind(partition.scheme.as_str())
        .bind(&partition.series)
        .bind(&partition.issuer_tax_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("latest_chain_hash", e))?;

        match row {
            Some(row) => {
                let hash: Option<String> = row
                    .try_get("hash")
                    .map_err(|e| StoreError::Serialization(format!("chain hash column: {e}")))?;
                Ok(hash)
            }
            None => Ok(None),
        }
    }

    async fn next_number(&mut self, partition: &PartitionKey) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(number), 0) + 1 AS next_number
            FROM fiscal_documents
            WHERE scheme = $1 AND series = $2 AND issuer_tax_id = $3
            "#,
        )
        .bind(partition.scheme.as_str())
        .bind(&partition.series)
        .bind(&partition.issuer_tax_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_number", e))?;

        let next: i64 = row
            .try_get("next_number")
            .map_err(|e| StoreError::Serialization(format!("next_number column: {e}")))?;
        Ok(next as u64)
    }

    async fn insert_document(
        &mut self,
        document: NewFiscalDocument,
    ) -> Result<DocumentId, StoreError> {
        let chain_payload = serde_json::to_value(&document.chain_payload)
            .map_err(|e| StoreError::Serialization(format!("chain payload: {e}")))?;

        let row = sqlx::query(
            r#"
            INSERT INTO fiscal_documents (
                external_uuid,
                store_id,
                user_id,
                issuer_tax_id,
                series,
                number,
                issued_at,
                kind,
                status,
                correction_type,
                references_document_id,
                scheme,
                chain_payload,
                taxable_base,
                tax_amount,
                final_total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'issued', $9, $10, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(document.external_uuid)
        .bind(document.store_id.as_i64())
        .bind(document.user_id.as_i64())
        .bind(&document.issuer_tax_id)
        .bind(&document.series)
        .bind(document.number as i64)
        .bind(document.issued_at)
        .bind(document.kind.as_str())
        .bind(document.correction_type.map(CorrectionType::code))
        .bind(document.references_document_id.map(|id| id.as_i64()))
        .bind(document.scheme.as_str())
        .bind(&chain_payload)
        .bind(document.taxable_base)
        .bind(document.tax_amount)
        .bind(document.final_total)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "number {} already taken in partition {}/{}/{}",
                    document.number, document.scheme, document.series, document.issuer_tax_id
                ))
            } else {
                map_sqlx_error("insert_document", e)
            }
        })?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::Serialization(format!("inserted id column: {e}")))?;
        Ok(DocumentId::from_i64(id))
    }

    async fn mark_cancelled(&mut self, id: DocumentId, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fiscal_documents
            SET status = 'cancelled', cancellation_reason = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(reason)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("mark_cancelled", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "cancellation of document {id} touched {} rows",
                result.rows_affected()
            )));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

fn select_documents_sql(where_clause: &str, suffix: &str) -> String {
    format!(
        r#"
        SELECT
            id,
            external_uuid,
            store_id,
            user_id,
            issuer_tax_id,
            series,
            number,
            issued_at,
            kind,
            status,
            cancellation_reason,
            correction_type,
            references_document_id,
            scheme,
            chain_payload,
            taxable_base,
            tax_amount,
            final_total
        FROM fiscal_documents
        {where_clause}
        {suffix}
        "#
    )
}

/// Map SQLx errors to StoreError.
///
/// Uniqueness violations, lock-wait timeouts and deadlocks are all conflict
/// outcomes of concurrent operations on the same partition; everything else
/// is a backend failure.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505" | "55P03" | "40P01") => StoreError::Conflict(msg),
                _ => StoreError::Backend(anyhow::anyhow!(msg)),
            }
        }
        other => StoreError::Backend(anyhow::Error::new(other).context(format!(
            "sqlx error in {operation}"
        ))),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct FiscalDocumentRow {
    id: i64,
    external_uuid: Uuid,
    store_id: i64,
    user_id: i64,
    issuer_tax_id: String,
    series: String,
    number: i64,
    issued_at: DateTime<Utc>,
    kind: String,
    status: String,
    cancellation_reason: Option<String>,
    correction_type: Option<String>,
    references_document_id: Option<i64>,
    scheme: String,
    chain_payload: serde_json::Value,
    taxable_base: Decimal,
    tax_amount: Decimal,
    final_total: Decimal,
}

impl<'r> sqlx::FromRow<'r, PgRow> for FiscalDocumentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(FiscalDocumentRow {
            id: row.try_get("id")?,
            external_uuid: row.try_get("external_uuid")?,
            store_id: row.try_get("store_id")?,
            user_id: row.try_get("user_id")?,
            issuer_tax_id: row.try_get("issuer_tax_id")?,
            series: row.try_get("series")?,
            number: row.try_get("number")?,
            issued_at: row.try_get("issued_at")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            cancellation_reason: row.try_get("cancellation_reason")?,
            correction_type: row.try_get("correction_type")?,
            references_document_id: row.try_get("references_document_id")?,
            scheme: row.try_get("scheme")?,
            chain_payload: row.try_get("chain_payload")?,
            taxable_base: row.try_get("taxable_base")?,
            tax_amount: row.try_get("tax_amount")?,
            final_total: row.try_get("final_total")?,
        })
    }
}

impl TryFrom<FiscalDocumentRow> for FiscalDocument {
    type Error = StoreError;

    fn try_from(row: FiscalDocumentRow) -> Result<Self, Self::Error> {
        let kind = DocumentKind::parse(&row.kind)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let status = DocumentStatus::parse(&row.status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let correction_type = row
            .correction_type
            .as_deref()
            .map(CorrectionType::from_code)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let scheme = SchemeId::new(row.scheme)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let chain_payload: ChainPayload = serde_json::from_value(row.chain_payload)
            .map_err(|e| StoreError::Serialization(format!("chain payload: {e}")))?;

        Ok(FiscalDocument {
            id: DocumentId::from_i64(row.id),
            external_uuid: row.external_uuid,
            store_id: StoreId::from_i64(row.store_id),
            user_id: UserId::from_i64(row.user_id),
            issuer_tax_id: row.issuer_tax_id,
            series: row.series,
            number: row.number as u64,
            issued_at: row.issued_at,
            kind,
            status,
            cancellation_reason: row.cancellation_reason,
            correction_type,
            references_document_id: row.references_document_id.map(DocumentId::from_i64),
            scheme,
            chain_payload,
            taxable_base: row.taxable_base,
            tax_amount: row.tax_amount,
            final_total: row.final_total,
        })
    }
}

fn document_from_row(row: &PgRow) -> Result<FiscalDocument, StoreError> {
    let parsed = FiscalDocumentRow::from_row(row)
        .map_err(|e| StoreError::Serialization(format!("document row: {e}")))?;
    parsed.try_into()
}
