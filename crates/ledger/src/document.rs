use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fiscalchain_core::{DocumentId, DomainError, SchemeId, StoreId, UserId};

use crate::partition::PartitionKey;
use crate::payload::ChainPayload;

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Issued,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Issued => "issued",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "issued" => Ok(DocumentStatus::Issued),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown document status: {other}"
            ))),
        }
    }
}

/// Issuance kind of a ledger entry.
///
/// `Ordinary` rows are written by the issuance flow; this subsystem reads
/// them and appends `Rectifying` (amount corrections) and `Cancellation`
/// entries referencing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Ordinary,
    Rectifying,
    Cancellation,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Ordinary => "ordinary",
            DocumentKind::Rectifying => "rectifying",
            DocumentKind::Cancellation => "cancellation",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "ordinary" => Ok(DocumentKind::Ordinary),
            "rectifying" => Ok(DocumentKind::Rectifying),
            "cancellation" => Ok(DocumentKind::Cancellation),
            other => Err(DomainError::validation(format!(
                "unknown document kind: {other}"
            ))),
        }
    }
}

/// How a rectifying entry's amounts were derived.
///
/// Serialized with the single-letter codes the upstream feed uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectionType {
    /// Full reversal of the original.
    #[serde(rename = "S")]
    Full,
    /// Difference against a replacement total.
    #[serde(rename = "I")]
    Delta,
}

impl CorrectionType {
    pub fn code(self) -> &'static str {
        match self {
            CorrectionType::Full => "S",
            CorrectionType::Delta => "I",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, DomainError> {
        match code {
            "S" => Ok(CorrectionType::Full),
            "I" => Ok(CorrectionType::Delta),
            other => Err(DomainError::validation(format!(
                "unknown correction type code: {other}"
            ))),
        }
    }
}

/// One row of the fiscal ledger.
///
/// Rows are append-only. The only mutation the ledger ever performs after
/// insert is flipping `status` to `Cancelled` (with a reason) on the
/// original row of a cancellation; amounts, numbering and the chain payload
/// never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub id: DocumentId,
    /// Opaque caller-facing reference.
    pub external_uuid: Uuid,
    pub store_id: StoreId,
    pub user_id: UserId,
    pub issuer_tax_id: String,
    pub series: String,
    /// Position within the partition; unique and strictly increasing.
    pub number: u64,
    pub issued_at: DateTime<Utc>,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    pub cancellation_reason: Option<String>,
    pub correction_type: Option<CorrectionType>,
    /// Original entry this cancellation/correction compensates.
    pub references_document_id: Option<DocumentId>,
    pub scheme: SchemeId,
    pub chain_payload: ChainPayload,
    pub taxable_base: Decimal,
    pub tax_amount: Decimal,
    pub final_total: Decimal,
}

impl FiscalDocument {
    /// Numbering partition this row belongs to.
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(
            self.scheme.clone(),
            self.series.clone(),
            self.issuer_tax_id.clone(),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == DocumentStatus::Cancelled
    }

    /// A document can be cancelled once; repeat attempts conflict.
    pub fn ensure_cancellable(&self) -> Result<(), DomainError> {
        if self.is_cancelled() {
            return Err(DomainError::conflict("document is already cancelled"));
        }
        Ok(())
    }

    /// Corrections may stack against one original, but never after it was
    /// cancelled.
    pub fn ensure_correctable(&self) -> Result<(), DomainError> {
        if self.is_cancelled() {
            return Err(DomainError::conflict("cannot correct a cancelled document"));
        }
        Ok(())
    }
}

/// Insert payload for a new ledger entry.
///
/// `id` is assigned by storage; new entries always start as
/// [`DocumentStatus::Issued`] with no cancellation reason, so neither field
/// appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFiscalDocument {
    pub external_uuid: Uuid,
    pub store_id: StoreId,
    pub user_id: UserId,
    pub issuer_tax_id: String,
    pub series: String,
    pub number: u64,
    pub issued_at: DateTime<Utc>,
    pub kind: DocumentKind,
    pub correction_type: Option<CorrectionType>,
    pub references_document_id: Option<DocumentId>,
    pub scheme: SchemeId,
    pub chain_payload: ChainPayload,
    pub taxable_base: Decimal,
    pub tax_amount: Decimal,
    pub final_total: Decimal,
}

impl NewFiscalDocument {
    /// Stored form of this entry under its assigned key.
    pub fn into_document(self, id: DocumentId) -> FiscalDocument {
        FiscalDocument {
            id,
            external_uuid: self.external_uuid,
            store_id: self.store_id,
            user_id: self.user_id,
            issuer_tax_id: self.issuer_tax_id,
            series: self.series,
            number: self.number,
            issued_at: self.issued_at,
            kind: self.kind,
            status: DocumentStatus::Issued,
            cancellation_reason: None,
            correction_type: self.correction_type,
            references_document_id: self.references_document_id,
            scheme: self.scheme,
            chain_payload: self.chain_payload,
            taxable_base: self.taxable_base,
            tax_amount: self.tax_amount,
            final_total: self.final_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_document(status: DocumentStatus) -> FiscalDocument {
        FiscalDocument {
            id: DocumentId::from_i64(1),
            external_uuid: Uuid::now_v7(),
            store_id: StoreId::from_i64(3),
            user_id: UserId::from_i64(7),
            issuer_tax_id: "B12345678".to_string(),
            series: "A-2026".to_string(),
            number: 12,
            issued_at: Utc::now(),
            kind: DocumentKind::Ordinary,
            status,
            cancellation_reason: None,
            correction_type: None,
            references_document_id: None,
            scheme: SchemeId::new("verifactu").unwrap(),
            chain_payload: ChainPayload::new("abc123", None),
            taxable_base: Decimal::new(10000, 2),
            tax_amount: Decimal::new(1000, 2),
            final_total: Decimal::new(11000, 2),
        }
    }

    #[test]
    fn issued_document_passes_both_state_checks() {
        let doc = test_document(DocumentStatus::Issued);
        assert!(doc.ensure_cancellable().is_ok());
        assert!(doc.ensure_correctable().is_ok());
    }

    #[test]
    fn cancelled_document_fails_both_state_checks() {
        let doc = test_document(DocumentStatus::Cancelled);
        assert!(matches!(
            doc.ensure_cancellable(),
            Err(DomainError::Conflict(_))
        ));
        assert!(matches!(
            doc.ensure_correctable(),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn partition_key_combines_scheme_series_and_issuer() {
        let doc = test_document(DocumentStatus::Issued);
        let partition = doc.partition();
        assert_eq!(partition.scheme.as_str(), "verifactu");
        assert_eq!(partition.series, "A-2026");
        assert_eq!(partition.issuer_tax_id, "B12345678");
        assert_eq!(partition.to_string(), "verifactu/A-2026/B12345678");
    }

    #[test]
    fn correction_type_codes_round_trip() {
        assert_eq!(CorrectionType::Full.code(), "S");
        assert_eq!(CorrectionType::Delta.code(), "I");
        assert_eq!(
            CorrectionType::from_code("S").unwrap(),
            CorrectionType::Full
        );
        assert_eq!(
            CorrectionType::from_code("I").unwrap(),
            CorrectionType::Delta
        );
        assert!(CorrectionType::from_code("X").is_err());
    }

    #[test]
    fn status_and_kind_parse_their_storage_strings() {
        assert_eq!(
            DocumentStatus::parse("issued").unwrap(),
            DocumentStatus::Issued
        );
        assert_eq!(
            DocumentKind::parse("cancellation").unwrap(),
            DocumentKind::Cancellation
        );
        assert!(DocumentStatus::parse("void").is_err());
        assert!(DocumentKind::parse("credit-note").is_err());
    }
}
