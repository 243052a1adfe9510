use serde::{Deserialize, Serialize};

use fiscalchain_core::SchemeId;

/// Numbering partition of the ledger.
///
/// Sequence numbers and the hash chain are scoped to one partition; entries
/// in different partitions share neither.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub scheme: SchemeId,
    pub series: String,
    pub issuer_tax_id: String,
}

impl PartitionKey {
    pub fn new(
        scheme: SchemeId,
        series: impl Into<String>,
        issuer_tax_id: impl Into<String>,
    ) -> Self {
        Self {
            scheme,
            series: series.into(),
            issuer_tax_id: issuer_tax_id.into(),
        }
    }
}

impl core::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.scheme, self.series, self.issuer_tax_id)
    }
}
