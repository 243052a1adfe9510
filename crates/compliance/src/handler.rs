use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use fiscalchain_core::SchemeId;
use fiscalchain_ledger::{
    ChainPayload, CorrectionAmounts, CorrectionType, DocumentKind, FiscalDocument,
};

/// Compliance payload generation error.
///
/// Any of these aborts the running ledger operation; the orchestrator rolls
/// the transaction back and surfaces the failure.
#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("scheme rejected the document: {0}")]
    Rejected(String),
}

/// Draft of a ledger entry, handed to the scheme handler for payload
/// generation. Carries everything a handler may fold into its hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentContext {
    pub scheme: SchemeId,
    pub issuer_tax_id: String,
    pub series: String,
    pub number: u64,
    pub issued_at: DateTime<Utc>,
    pub kind: DocumentKind,
    pub correction_type: Option<CorrectionType>,
    pub amounts: CorrectionAmounts,
}

/// Inputs of a cancellation entry's payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationContext {
    pub reason: String,
    pub issued_at: DateTime<Utc>,
}

/// Per-scheme compliance capability.
///
/// One implementation per regulatory scheme. Handlers compute the
/// tamper-evidence payload for a draft entry; they never touch storage and
/// must stay deterministic for a given input and previous hash. Handlers
/// show up in registry dumps and error reports, hence the `Debug` bound.
pub trait ComplianceHandler: Debug + Send + Sync {
    /// Scheme this handler serves; the registry keys on it.
    fn scheme(&self) -> SchemeId;

    /// Payload for a new (ordinary or rectifying) entry.
    fn generate_compliance_data(
        &self,
        document: &DocumentContext,
        previous_hash: Option<&str>,
    ) -> Result<ChainPayload, ComplianceError>;

    /// Payload for a cancellation entry.
    ///
    /// Runs before the entry's number is allocated, so the payload covers
    /// only the original document and the cancellation inputs.
    fn generate_cancellation_data(
        &self,
        original: &FiscalDocument,
        cancellation: &CancellationContext,
        previous_hash: Option<&str>,
    ) -> Result<ChainPayload, ComplianceError>;
}
