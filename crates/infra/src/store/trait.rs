use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use fiscalchain_core::DocumentId;
use fiscalchain_ledger::{FiscalDocument, NewFiscalDocument, PartitionKey};

/// Ledger storage operation error.
///
/// These are **infrastructure errors** (connections, serialization,
/// constraint hits) as opposed to domain errors. `Conflict` is the storage
/// face of the partition uniqueness backstop: with the partition lock held
/// it should be unreachable, but a violation still surfaces as a conflict
/// rather than a generic backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("row serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Transactional storage seam of the fiscal ledger.
///
/// Every ledger operation runs inside exactly one transaction obtained from
/// `begin`. Nothing a transaction stages is visible to readers until
/// `commit`; dropping or rolling back discards all of it.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Read a document outside any operation transaction.
    async fn document(&self, id: DocumentId) -> Result<Option<FiscalDocument>, StoreError>;

    /// Resolve a document by its caller-facing reference.
    async fn document_by_uuid(&self, uuid: Uuid) -> Result<Option<FiscalDocument>, StoreError>;

    /// All documents of a partition, ordered by number ascending.
    async fn partition_documents(
        &self,
        partition: &PartitionKey,
    ) -> Result<Vec<FiscalDocument>, StoreError>;
}

/// One open ledger transaction.
///
/// Implementations must hold every acquired lock until `commit` or
/// `rollback`, and must discard staged writes when the transaction is
/// dropped without committing.
#[async_trait]
pub trait LedgerTx: Send {
    /// Load a document row under an exclusive lock.
    async fn lock_document(
        &mut self,
        id: DocumentId,
    ) -> Result<Option<FiscalDocument>, StoreError>;

    /// Take the partition's exclusive lock, creating its row on first use.
    ///
    /// Serializes number allocation and chain-head reads across concurrent
    /// operations in the same partition; acquire it before either.
    async fn lock_partition(&mut self, partition: &PartitionKey) -> Result<(), StoreError>;

    /// Chain link of the partition's highest-numbered entry.
    async fn latest_chain_hash(
        &mut self,
        partition: &PartitionKey,
    ) -> Result<Option<String>, StoreError>;

    /// Next sequence number for the partition: highest assigned + 1, or 1
    /// for an empty partition.
    async fn next_number(&mut self, partition: &PartitionKey) -> Result<u64, StoreError>;

    /// Stage a new entry; the assigned row id is returned immediately but
    /// the row stays invisible until commit.
    async fn insert_document(&mut self, document: NewFiscalDocument)
    -> Result<DocumentId, StoreError>;

    /// Flip a document to cancelled with the given reason.
    async fn mark_cancelled(&mut self, id: DocumentId, reason: &str) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
