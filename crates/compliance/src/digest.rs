use std::collections::BTreeMap;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use fiscalchain_core::SchemeId;
use fiscalchain_ledger::{ChainPayload, FiscalDocument};

use crate::handler::{CancellationContext, ComplianceError, ComplianceHandler, DocumentContext};

/// Deterministic SHA-256 chain handler.
///
/// Hashes the entry's canonical fields together with the previous chain
/// link and records both in the payload. Serves development and tests under
/// any scheme name; regulatory schemes register their own implementations.
#[derive(Debug)]
pub struct DigestChainHandler {
    scheme: SchemeId,
}

impl DigestChainHandler {
    pub fn new(scheme: SchemeId) -> Self {
        Self { scheme }
    }

    /// Hash the sorted field map's JSON rendering.
    ///
    /// `BTreeMap` keeps key order stable, so equal inputs always produce
    /// equal digests.
    fn digest(fields: &BTreeMap<&'static str, Value>) -> Result<String, ComplianceError> {
        let canonical = serde_json::to_string(fields)
            .map_err(|e| ComplianceError::Serialization(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

impl ComplianceHandler for DigestChainHandler {
    fn scheme(&self) -> SchemeId {
        self.scheme.clone()
    }

    fn generate_compliance_data(
        &self,
        document: &DocumentContext,
        previous_hash: Option<&str>,
    ) -> Result<ChainPayload, ComplianceError> {
        let mut fields = BTreeMap::new();
        fields.insert("scheme", json!(document.scheme));
        fields.insert("issuer_tax_id", json!(document.issuer_tax_id));
        fields.insert("series", json!(document.series));
        fields.insert("number", json!(document.number));
        fields.insert("issued_at", json!(document.issued_at));
        fields.insert("kind", json!(document.kind));
        fields.insert("correction_type", json!(document.correction_type));
        fields.insert("taxable_base", json!(document.amounts.taxable_base));
        fields.insert("tax_amount", json!(document.amounts.tax_amount));
        fields.insert("final_total", json!(document.amounts.final_total));
        fields.insert("previous_hash", json!(previous_hash));

        let hash = Self::digest(&fields)?;
        Ok(ChainPayload::new(hash, previous_hash.map(str::to_owned)))
    }

    fn generate_cancellation_data(
        &self,
        original: &FiscalDocument,
        cancellation: &CancellationContext,
        previous_hash: Option<&str>,
    ) -> Result<ChainPayload, ComplianceError> {
        let mut fields = BTreeMap::new();
        fields.insert("scheme", json!(original.scheme));
        fields.insert("issuer_tax_id", json!(original.issuer_tax_id));
        fields.insert("series", json!(original.series));
        fields.insert("cancels_number", json!(original.number));
        fields.insert("cancels_uuid", json!(original.external_uuid));
        fields.insert("reason", json!(cancellation.reason));
        fields.insert("issued_at", json!(cancellation.issued_at));
        fields.insert("previous_hash", json!(previous_hash));

        let hash = Self::digest(&fields)?;
        Ok(ChainPayload::new(hash, previous_hash.map(str::to_owned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use fiscalchain_core::{DocumentId, StoreId, UserId};
    use fiscalchain_ledger::{CorrectionAmounts, DocumentKind, DocumentStatus};

    fn test_scheme() -> SchemeId {
        SchemeId::new("verifactu").unwrap()
    }

    fn test_context(number: u64) -> DocumentContext {
        DocumentContext {
            scheme: test_scheme(),
            issuer_tax_id: "B12345678".to_string(),
            series: "A-2026".to_string(),
            number,
            issued_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
            kind: DocumentKind::Rectifying,
            correction_type: None,
            amounts: CorrectionAmounts::zero(),
        }
    }

    fn test_original() -> FiscalDocument {
        FiscalDocument {
            id: DocumentId::from_i64(1),
            external_uuid: Uuid::nil(),
            store_id: StoreId::from_i64(3),
            user_id: UserId::from_i64(7),
            issuer_tax_id: "B12345678".to_string(),
            series: "A-2026".to_string(),
            number: 5,
            issued_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            kind: DocumentKind::Ordinary,
            status: DocumentStatus::Issued,
            cancellation_reason: None,
            correction_type: None,
            references_document_id: None,
            scheme: test_scheme(),
            chain_payload: ChainPayload::new("head", None),
            taxable_base: Decimal::new(10000, 2),
            tax_amount: Decimal::new(1000, 2),
            final_total: Decimal::new(11000, 2),
        }
    }

    #[test]
    fn equal_inputs_produce_equal_payloads() {
        let handler = DigestChainHandler::new(test_scheme());
        let a = handler
            .generate_compliance_data(&test_context(6), Some("head"))
            .unwrap();
        let b = handler
            .generate_compliance_data(&test_context(6), Some("head"))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.previous_hash.as_deref(), Some("head"));
    }

    #[test]
    fn previous_hash_changes_the_digest() {
        let handler = DigestChainHandler::new(test_scheme());
        let first = handler
            .generate_compliance_data(&test_context(6), None)
            .unwrap();
        let chained = handler
            .generate_compliance_data(&test_context(6), Some(&first.hash))
            .unwrap();
        assert_ne!(first.hash, chained.hash);
        assert_eq!(chained.previous_hash, Some(first.hash));
    }

    #[test]
    fn cancellation_payload_links_to_the_partition_head() {
        let handler = DigestChainHandler::new(test_scheme());
        let context = CancellationContext {
            reason: "issued against the wrong customer".to_string(),
            issued_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
        };
        let payload = handler
            .generate_cancellation_data(&test_original(), &context, Some("head"))
            .unwrap();
        assert_eq!(payload.previous_hash.as_deref(), Some("head"));
        assert_eq!(payload.hash.len(), 64);

        let other_reason = CancellationContext {
            reason: "duplicate".to_string(),
            ..context
        };
        let other = handler
            .generate_cancellation_data(&test_original(), &other_reason, Some("head"))
            .unwrap();
        assert_ne!(payload.hash, other.hash);
    }
}
