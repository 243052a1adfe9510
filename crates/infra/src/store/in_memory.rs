use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use fiscalchain_core::DocumentId;
use fiscalchain_ledger::{DocumentStatus, FiscalDocument, NewFiscalDocument, PartitionKey};

use super::r#trait::{LedgerStore, LedgerTx, StoreError};

#[derive(Debug, Clone, Default)]
struct MemState {
    next_id: i64,
    documents: BTreeMap<DocumentId, FiscalDocument>,
}

impl MemState {
    fn partition_head(&self, partition: &PartitionKey) -> Option<&FiscalDocument> {
        self.documents
            .values()
            .filter(|d| d.partition() == *partition)
            .max_by_key(|d| d.number)
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Not optimized for performance. `begin` takes the
/// whole-store lock, so transactions are fully serialized: writes land in a
/// scratch copy that replaces the shared state on commit and is discarded on
/// rollback.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let scratch = guard.clone();
        Ok(InMemoryLedgerTx { guard, scratch })
    }

    async fn document(&self, id: DocumentId) -> Result<Option<FiscalDocument>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.documents.get(&id).cloned())
    }

    async fn document_by_uuid(&self, uuid: Uuid) -> Result<Option<FiscalDocument>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .documents
            .values()
            .find(|d| d.external_uuid == uuid)
            .cloned())
    }

    async fn partition_documents(
        &self,
        partition: &PartitionKey,
    ) -> Result<Vec<FiscalDocument>, StoreError> {
        let state = self.state.lock().await;
        let mut documents: Vec<FiscalDocument> = state
            .documents
            .values()
            .filter(|d| d.partition() == *partition)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.number);
        Ok(documents)
    }
}

/// One open transaction over the in-memory store.
#[derive(Debug)]
pub struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<MemState>,
    scratch: MemState,
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn lock_document(
        &mut self,
        id: DocumentId,
    ) -> Result<Option<FiscalDocument>, StoreError> {
        Ok(self.scratch.documents.get(&id).cloned())
    }

    async fn lock_partition(&mut self, _partition: &PartitionKey) -> Result<(), StoreError> {
        // The whole-store lock held since `begin` already serializes every
        // partition.
        Ok(())
    }

    async fn latest_chain_hash(
        &mut self,
        partition: &PartitionKey,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .scratch
            .partition_head(partition)
            .map(|d| d.chain_payload.hash.clone()))
    }

    async fn next_number(&mut self, partition: &PartitionKey) -> Result<u64, StoreError> {
        Ok(self
            .scratch
            .partition_head(partition)
            .map(|d| d.number + 1)
            .unwrap_or(1))
    }

    async fn insert_document(
        &mut self,
        document: NewFiscalDocument,
    ) -> Result<DocumentId, StoreError> {
        let partition = PartitionKey::new(
            document.scheme.clone(),
            document.series.clone(),
            document.issuer_tax_id.clone(),
        );
        let taken = self
            .scratch
            .documents
            .values()
            .any(|d| d.partition() == partition && d.number == document.number);
        if taken {
            return Err(StoreError::Conflict(format!(
                "number {} already taken in partition {partition}",
                document.number
            )));
        }

        self.scratch.next_id += 1;
        let id = DocumentId::from_i64(self.scratch.next_id);
        self.scratch.documents.insert(id, document.into_document(id));
        Ok(id)
    }

    async fn mark_cancelled(&mut self, id: DocumentId, reason: &str) -> Result<(), StoreError> {
        match self.scratch.documents.get_mut(&id) {
            Some(document) => {
                document.status = DocumentStatus::Cancelled;
                document.cancellation_reason = Some(reason.to_owned());
                Ok(())
            }
            None => Err(StoreError::Backend(anyhow::anyhow!(
                "document {id} not found for cancellation"
            ))),
        }
    }

    async fn commit(self) -> Result<(), StoreError> {
        let InMemoryLedgerTx { mut guard, scratch } = self;
        *guard = scratch;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Dropping the guard releases the store without publishing scratch.
        Ok(())
    }
}
