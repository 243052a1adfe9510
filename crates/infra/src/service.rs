//! Ledger operation pipeline (application-level orchestration).
//!
//! This module implements the two mutations the fiscal ledger supports:
//! cancelling an issued document and correcting its amounts. Both run the
//! same pipeline inside one storage transaction:
//!
//! ```text
//! Request
//!   ↓
//! 1. Lock the original row (absent → not found)
//!   ↓
//! 2. Check document state (already cancelled → conflict)
//!   ↓
//! 3. Resolve the scheme's compliance handler (unregistered → configuration error)
//!   ↓
//! 4. Lock the numbering partition
//!   ↓
//! 5. Read the chain head and allocate the next sequence number
//!   ↓
//! 6. Generate the compliance payload
//!   ↓
//! 7. Append the compensating entry (and flip the original on cancel)
//!   ↓
//! 8. Commit
//! ```
//!
//! Cancellations hash before the number is allocated, so their payload covers
//! the original document and the cancellation inputs only; corrections hash
//! the fully-numbered draft. Any failure between steps 1 and 7 rolls the
//! transaction back, so a failed operation never leaves partial writes.
//!
//! ## Concurrency
//!
//! The partition lock taken in step 4 serializes the chain-head read and the
//! number allocation across concurrent operations on the same partition, so
//! numbers stay gapless and each payload links the true predecessor. The
//! unique index on (scheme, series, issuer tax id, number) backs this up in
//! storage; a violation surfaces as a conflict.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use fiscalchain_compliance::{
    CancellationContext, ComplianceError, DocumentContext, HandlerRegistry,
};
use fiscalchain_core::{ActorContext, DocumentId, DomainError};
use fiscalchain_ledger::{
    CorrectionAmounts, CorrectionType, DocumentKind, FiscalDocument, NewFiscalDocument,
};

use crate::directory::StoreDirectory;
use crate::store::{LedgerStore, LedgerTx, StoreError};

/// Reason recorded when a cancellation request carries none.
pub const DEFAULT_CANCELLATION_REASON: &str = "cancelled at issuer request";

/// Why a ledger operation failed.
///
/// Every failure rolls the transaction back before it is returned, so a
/// failed operation leaves no partial writes behind.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Request is malformed or fails domain validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The referenced document does not exist.
    #[error("document not found")]
    NotFound,
    /// The document's state or the partition's numbering rejects the change.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The deployment lacks wiring the request needs (handler, store config).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Storage or compliance machinery failed.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            OperationError::Validation(_) => 400,
            OperationError::NotFound => 404,
            OperationError::Conflict(_) => 409,
            OperationError::Configuration(_) => 500,
            OperationError::Internal(_) => 500,
        }
    }
}

impl From<DomainError> for OperationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => OperationError::Validation(msg),
            DomainError::InvalidId(msg) => OperationError::Validation(msg),
            DomainError::NotFound => OperationError::NotFound,
            DomainError::Conflict(msg) => OperationError::Conflict(msg),
            DomainError::Configuration(msg) => OperationError::Configuration(msg),
        }
    }
}

impl From<StoreError> for OperationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => OperationError::Conflict(msg),
            other => OperationError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<ComplianceError> for OperationError {
    fn from(value: ComplianceError) -> Self {
        OperationError::Internal(anyhow::Error::new(value))
    }
}

/// Inputs of a cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub document_id: DocumentId,
    /// Recorded on the original row; blank or absent falls back to
    /// [`DEFAULT_CANCELLATION_REASON`].
    pub reason: Option<String>,
}

/// Inputs of an amount correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectRequest {
    pub document_id: DocumentId,
    pub correction_type: CorrectionType,
    /// Replacement grand total. Required for delta corrections, ignored for
    /// full reversals.
    pub new_total: Option<Decimal>,
    /// Why the amounts are being corrected. Must be non-blank; corrections
    /// never touch the original row, so the reason is validated for the
    /// caller's audit trail rather than persisted here.
    pub reason: String,
}

/// Fiscal ledger operations engine.
///
/// Composes a [`LedgerStore`], a [`StoreDirectory`] and a [`HandlerRegistry`]
/// into the cancellation and correction pipeline. Generic over the store and
/// directory so tests run against the in-memory backends and deployments
/// against Postgres without touching the flow.
///
/// ## Execution Guarantees
///
/// - The original row stays locked for the whole operation
/// - Partition numbering is serialized, so sequence numbers are gapless
/// - Either every write of an operation commits or none does
#[derive(Debug)]
pub struct LedgerService<S, D> {
    store: S,
    directory: D,
    handlers: Arc<HandlerRegistry>,
}

impl<S, D> LedgerService<S, D> {
    pub fn new(store: S, directory: D, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            directory,
            handlers,
        }
    }

    /// Underlying store, for read paths.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, D, Arc<HandlerRegistry>) {
        (self.store, self.directory, self.handlers)
    }
}

impl<S, D> LedgerService<S, D>
where
    S: LedgerStore,
    D: StoreDirectory,
{
    /// Cancel an issued document.
    ///
    /// Appends a cancellation entry (zero amounts, next number in the
    /// original's partition, payload chained to the partition head) and flips
    /// the original row to cancelled with the given reason. Returns the
    /// appended entry.
    #[instrument(
        skip(self, request, actor),
        fields(
            document_id = %request.document_id,
            user_id = %actor.user_id,
            scheme = tracing::field::Empty,
            number = tracing::field::Empty,
        ),
        err
    )]
    pub async fn cancel(
        &self,
        request: CancelRequest,
        actor: &ActorContext,
    ) -> Result<FiscalDocument, OperationError> {
        let mut tx = self.store.begin().await?;
        match self.cancel_in_tx(&mut tx, request, actor).await {
            Ok(document) => {
                tx.commit().await?;
                Ok(document)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed after cancel error");
                }
                Err(err)
            }
        }
    }

    /// Correct the amounts of an issued document.
    ///
    /// Appends a rectifying entry whose total is either the negated original
    /// total (full) or the difference to a replacement total (delta), split
    /// into base and VAT at the issuing store's rate. The original row is
    /// never modified; corrections may stack. Malformed requests (blank
    /// reason, missing or negative replacement total) are rejected before
    /// any transaction or lock is taken.
    #[instrument(
        skip(self, request, actor),
        fields(
            document_id = %request.document_id,
            correction_type = request.correction_type.code(),
            user_id = %actor.user_id,
            scheme = tracing::field::Empty,
            number = tracing::field::Empty,
        ),
        err
    )]
    pub async fn correct(
        &self,
        request: CorrectRequest,
        actor: &ActorContext,
    ) -> Result<FiscalDocument, OperationError> {
        // Reject malformed requests before opening a transaction.
        if request.reason.trim().is_empty() {
            return Err(OperationError::Validation(
                "corrections require a reason".to_string(),
            ));
        }
        let new_total = match request.correction_type {
            CorrectionType::Delta => {
                let total = request.new_total.ok_or_else(|| {
                    OperationError::Validation(
                        "delta corrections require a replacement total".to_string(),
                    )
                })?;
                if total < Decimal::ZERO {
                    return Err(OperationError::Validation(
                        "replacement total must not be negative".to_string(),
                    ));
                }
                Some(total)
            }
            CorrectionType::Full => None,
        };

        let mut tx = self.store.begin().await?;
        match self
            .correct_in_tx(
                &mut tx,
                request.document_id,
                request.correction_type,
                new_total,
                actor,
            )
            .await
        {
            Ok(document) => {
                tx.commit().await?;
                Ok(document)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed after correct error");
                }
                Err(err)
            }
        }
    }

    async fn cancel_in_tx(
        &self,
        tx: &mut S::Tx,
        request: CancelRequest,
        actor: &ActorContext,
    ) -> Result<FiscalDocument, OperationError> {
        // 1) Lock the original row for the whole operation.
        let original = tx
            .lock_document(request.document_id)
            .await?
            .ok_or(OperationError::NotFound)?;
        tracing::Span::current().record("scheme", original.scheme.as_str());

        // 2) A document is cancelled at most once.
        original.ensure_cancellable()?;

        // 3) Resolve the scheme's handler before touching the partition.
        let handler = self.handlers.resolve(&original.scheme)?;

        // 4) Serialize numbering and chain-head reads for the partition.
        let partition = original.partition();
        tx.lock_partition(&partition).await?;
        let previous_hash = tx.latest_chain_hash(&partition).await?;

        // 5) Compliance payload. Hashed before a number exists; covers the
        //    original document and the cancellation inputs.
        let issued_at = Utc::now();
        let reason = normalize_reason(request.reason);
        let cancellation = CancellationContext {
            reason: reason.clone(),
            issued_at,
        };
        let chain_payload = handler.generate_cancellation_data(
            &original,
            &cancellation,
            previous_hash.as_deref(),
        )?;

        // 6) Allocate the next number and append the cancellation entry.
        let number = tx.next_number(&partition).await?;
        tracing::Span::current().record("number", number);
        let amounts = CorrectionAmounts::zero();
        let new_document = NewFiscalDocument {
            external_uuid: Uuid::now_v7(),
            store_id: original.store_id,
            user_id: actor.user_id,
            issuer_tax_id: original.issuer_tax_id.clone(),
            series: original.series.clone(),
            number,
            issued_at,
            kind: DocumentKind::Cancellation,
            correction_type: None,
            references_document_id: Some(original.id),
            scheme: original.scheme.clone(),
            chain_payload,
            taxable_base: amounts.taxable_base,
            tax_amount: amounts.tax_amount,
            final_total: amounts.final_total,
        };
        let new_id = tx.insert_document(new_document.clone()).await?;

        // 7) Flip the original.
        tx.mark_cancelled(original.id, &reason).await?;

        Ok(new_document.into_document(new_id))
    }

    async fn correct_in_tx(
        &self,
        tx: &mut S::Tx,
        document_id: DocumentId,
        correction_type: CorrectionType,
        new_total: Option<Decimal>,
        actor: &ActorContext,
    ) -> Result<FiscalDocument, OperationError> {
        // 1) Lock the original row.
        let original = tx
            .lock_document(document_id)
            .await?
            .ok_or(OperationError::NotFound)?;
        tracing::Span::current().record("scheme", original.scheme.as_str());

        // 2) Cancelled documents cannot be corrected.
        original.ensure_correctable()?;

        // 3) Resolve the handler and the issuing store's settings.
        let handler = self.handlers.resolve(&original.scheme)?;
        let config = self
            .directory
            .store_config(original.store_id)
            .await?
            .ok_or_else(|| {
                OperationError::Configuration(format!(
                    "store {} is not configured",
                    original.store_id
                ))
            })?;

        // 4) Amounts: negate or diff the original total, split by VAT.
        let amounts = match correction_type {
            CorrectionType::Full => {
                CorrectionAmounts::full(original.final_total, config.vat_rate)?
            }
            CorrectionType::Delta => {
                let new_total = new_total.ok_or_else(|| {
                    OperationError::Validation(
                        "delta corrections require a replacement total".to_string(),
                    )
                })?;
                CorrectionAmounts::delta(original.final_total, new_total, config.vat_rate)?
            }
        };

        // 5) Serialize the partition, read the chain head, allocate the number.
        let partition = original.partition();
        tx.lock_partition(&partition).await?;
        let previous_hash = tx.latest_chain_hash(&partition).await?;
        let number = tx.next_number(&partition).await?;
        tracing::Span::current().record("number", number);

        // 6) Compliance payload covers the fully-numbered draft.
        let issued_at = Utc::now();
        let context = DocumentContext {
            scheme: original.scheme.clone(),
            issuer_tax_id: original.issuer_tax_id.clone(),
            series: original.series.clone(),
            number,
            issued_at,
            kind: DocumentKind::Rectifying,
            correction_type: Some(correction_type),
            amounts,
        };
        let chain_payload =
            handler.generate_compliance_data(&context, previous_hash.as_deref())?;

        // 7) Append the rectifying entry. The original row is not modified.
        let new_document = NewFiscalDocument {
            external_uuid: Uuid::now_v7(),
            store_id: original.store_id,
            user_id: actor.user_id,
            issuer_tax_id: original.issuer_tax_id.clone(),
            series: original.series.clone(),
            number,
            issued_at,
            kind: DocumentKind::Rectifying,
            correction_type: Some(correction_type),
            references_document_id: Some(original.id),
            scheme: original.scheme.clone(),
            chain_payload,
            taxable_base: amounts.taxable_base,
            tax_amount: amounts.tax_amount,
            final_total: amounts.final_total,
        };
        let new_id = tx.insert_document(new_document.clone()).await?;

        Ok(new_document.into_document(new_id))
    }
}

fn normalize_reason(reason: Option<String>) -> String {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_CANCELLATION_REASON.to_string())
}
