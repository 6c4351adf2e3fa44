// # Package Envelope
//
// The common persisted envelope shared by everything the committer writes:
// `content` (a catalog entry plus its managed file), `save_state`, and
// `config`. The content hash is always recomputed from the payload here,
// never trusted from the caller.

use crate::db::models::{DbPackage, PackageKind};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// An unpersisted package envelope handed to the committer.
#[derive(Debug, Clone)]
pub struct PackageEnvelope {
    pub kind: PackageKind,
    pub payload: Vec<u8>,
    pub metadata: Value,
}

impl PackageEnvelope {
    pub fn new(kind: PackageKind, payload: Vec<u8>, metadata: Value) -> Self {
        PackageEnvelope {
            kind,
            payload,
            metadata,
        }
    }

    /// SHA-256 of the payload bytes, uppercase hex.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload);
        hex::encode_upper(hasher.finalize())
    }

    /// Build the database row, recomputing the content hash.
    pub fn into_row(self) -> DbPackage {
        let content_hash = self.content_hash();
        DbPackage {
            id: Uuid::new_v4().to_string(),
            kind: self.kind,
            metadata_json: self.metadata.to_string(),
            payload: self.payload,
            content_hash,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_is_recomputed_from_payload() {
        let envelope = PackageEnvelope::new(
            PackageKind::SaveState,
            b"state bytes".to_vec(),
            json!({"slot": 1}),
        );
        let hash = envelope.content_hash();
        let row = envelope.into_row();

        assert_eq!(row.content_hash, hash);
        assert_eq!(row.content_hash.len(), 64);
        assert_eq!(row.metadata_json, r#"{"slot":1}"#);
    }

    #[test]
    fn same_payload_same_hash() {
        let a = PackageEnvelope::new(PackageKind::Config, b"abc".to_vec(), json!({}));
        let b = PackageEnvelope::new(PackageKind::SaveState, b"abc".to_vec(), json!({"x": 2}));
        // Hash depends on payload only
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
