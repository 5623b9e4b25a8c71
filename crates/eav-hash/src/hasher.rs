use eav_types::ContentHash;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"eav-entity-v1"`) that is prepended
/// to every hash computation, so an entity and a composite value with
/// identical encodings still produce different hashes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for entity payloads.
    pub const ENTITY: Self = Self {
        domain: "eav-entity-v1",
    };
    /// Hasher for nested composite values.
    pub const COMPOSITE: Self = Self {
        domain: "eav-composite-v1",
    };
    /// Hasher for collections of scalar or composite elements.
    pub const COLLECTION: Self = Self {
        domain: "eav-collection-v1",
    };
    /// Hasher for collections of entity or list-item references.
    pub const REFERENCES: Self = Self {
        domain: "eav-references-v1",
    };
    /// Hasher for a scheme's structure set.
    pub const STRUCTURE: Self = Self {
        domain: "eav-structure-v1",
    };

    /// A streaming BLAKE3 state already primed with the domain tag.
    pub fn start(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = self.start();
        hasher.update(data);
        ContentHash::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<ContentHash, HashError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HashError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = ContentHasher::ENTITY.hash(b"payload");
        let b = ContentHasher::ENTITY.hash(b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        let entity = ContentHasher::ENTITY.hash(data);
        let composite = ContentHasher::COMPOSITE.hash(data);
        let collection = ContentHasher::COLLECTION.hash(data);
        assert_ne!(entity, composite);
        assert_ne!(composite, collection);
        assert_ne!(entity, collection);
    }

    #[test]
    fn hash_json_hashes_the_serialized_form() {
        let value = serde_json::json!({"name": "Lines", "order": 2});
        let hash = ContentHasher::STRUCTURE.hash_json(&value).unwrap();
        let bytes = serde_json::to_vec(&value).unwrap();
        assert_eq!(hash, ContentHasher::STRUCTURE.hash(&bytes));
        assert_ne!(hash, ContentHasher::ENTITY.hash(&bytes));
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut h = ContentHasher::COMPOSITE.start();
        h.update(b"abc");
        let streamed = eav_types::ContentHash::from_hash(*h.finalize().as_bytes());
        assert_eq!(streamed, ContentHasher::COMPOSITE.hash(b"abc"));
    }
}
