//! Issuer configuration lookup.
//!
//! Stores carry the fiscal issuance settings the correction flow needs to
//! recompute amounts, in particular the default VAT rate. Soft-deleted
//! stores are invisible to the lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::instrument;

use fiscalchain_core::StoreId;

use crate::store::postgres::map_sqlx_error;
use crate::store::StoreError;

/// Fiscal issuance settings of one store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub issuer_tax_id: String,
    pub series: String,
    pub vat_rate: Decimal,
}

#[async_trait]
pub trait StoreDirectory: Send + Sync {
    /// Settings for an active store, `None` if unknown or soft-deleted.
    async fn store_config(&self, store_id: StoreId) -> Result<Option<StoreConfig>, StoreError>;
}

/// Fixed in-process directory.
///
/// Intended for tests/dev.
#[derive(Debug, Clone, Default)]
pub struct StaticStoreDirectory {
    configs: HashMap<StoreId, StoreConfig>,
}

impl StaticStoreDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, store_id: StoreId, config: StoreConfig) {
        self.configs.insert(store_id, config);
    }
}

#[async_trait]
impl StoreDirectory for StaticStoreDirectory {
    async fn store_config(&self, store_id: StoreId) -> Result<Option<StoreConfig>, StoreError> {
        Ok(self.configs.get(&store_id).cloned())
    }
}

/// Directory backed by the `stores` table.
#[derive(Debug, Clone)]
pub struct PgStoreDirectory {
    pool: Arc<PgPool>,
}

impl PgStoreDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), fields(store_id = %store_id), err)]
    async fn fetch_store_config(
        &self,
        store_id: StoreId,
    ) -> Result<Option<StoreConfig>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT tax_id, invoice_prefix, default_vat_rate
            FROM stores
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(store_id.as_i64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_store_config", e))?;

        match row {
            Some(row) => {
                let issuer_tax_id: String = row
                    .try_get("tax_id")
                    .map_err(|e| StoreError::Serialization(format!("store row: {e}")))?;
                let series: String = row
                    .try_get("invoice_prefix")
                    .map_err(|e| StoreError::Serialization(format!("store row: {e}")))?;
                let vat_rate: Decimal = row
                    .try_get("default_vat_rate")
                    .map_err(|e| StoreError::Serialization(format!("store row: {e}")))?;
                Ok(Some(StoreConfig {
                    issuer_tax_id,
                    series,
                    vat_rate,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StoreDirectory for PgStoreDirectory {
    async fn store_config(&self, store_id: StoreId) -> Result<Option<StoreConfig>, StoreError> {
        self.fetch_store_config(store_id).await
    }
}
