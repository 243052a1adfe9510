use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tamper-evidence payload attached to every ledger entry.
///
/// Produced by the compliance handler for the entry's scheme and persisted
/// opaquely. The ledger interprets only `hash` (the chain link this entry
/// contributes) and `previous_hash`; scheme-specific fields ride along in
/// `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPayload {
    /// Chain link for this entry.
    pub hash: String,
    /// Hash of the preceding entry in the partition; absent for the first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChainPayload {
    pub fn new(hash: impl Into<String>, previous_hash: Option<String>) -> Self {
        Self {
            hash: hash.into(),
            previous_hash,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scheme_fields_survive_a_round_trip_at_the_top_level() {
        let payload = ChainPayload::new("abc123", Some("def456".to_string()))
            .with_extra("qr_url", json!("https://example.test/qr"));

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["hash"], "abc123");
        assert_eq!(value["previous_hash"], "def456");
        assert_eq!(value["qr_url"], "https://example.test/qr");

        let back: ChainPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn previous_hash_is_omitted_when_absent() {
        let value = serde_json::to_value(ChainPayload::new("abc123", None)).unwrap();
        assert!(value.get("previous_hash").is_none());
    }
}
