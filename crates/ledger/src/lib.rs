//! `fiscalchain-ledger` — the fiscal ledger's document model.
//!
//! Pure domain: rows, partitions, chain payloads, state rules and the
//! correction calculator. Storage and orchestration live in
//! `fiscalchain-infra`.

pub mod correction;
pub mod document;
pub mod partition;
pub mod payload;

pub use correction::CorrectionAmounts;
pub use document::{
    CorrectionType, DocumentKind, DocumentStatus, FiscalDocument, NewFiscalDocument,
};
pub use partition::PartitionKey;
pub use payload::ChainPayload;
