//! Entity and query types.

use crate::key::EntityKey;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A record synchronized between the remote backend and the local replica.
///
/// `resolved` holds related entities looked up for presentation. It is a
/// transient cache: it is never persisted and is stripped before an entity is
/// written to the local store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Entity {
    /// Identifier, unique within the entity's table.
    pub id: EntityKey,
    /// Human-readable title.
    pub title: String,
    /// Remote version, increased by the backend on every accepted write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Hashes of the ad-hoc queries that returned this record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_tags: Vec<String>,
    /// Application data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldValue>,
    /// Large binary content.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub payload: Option<Vec<u8>>,
    /// Related entities resolved for display; never persisted.
    #[serde(skip)]
    pub resolved: BTreeMap<String, Vec<Entity>>,
}

impl Entity {
    /// Creates a new entity without an identifier.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EntityKey>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the remote version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets an application field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the binary payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns an application field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns true if the entity carries the given query tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.query_tags.iter().any(|t| t == tag)
    }

    /// Adds a query tag unless already present.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.query_tags.push(tag.to_string());
        }
    }
}

/// An ad-hoc query forwarded to the remote backend.
///
/// The core never evaluates queries itself; it only hashes them so records
/// returned by a query can be found again while offline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Query {
    criteria: BTreeMap<String, FieldValue>,
}

impl Query {
    /// Creates an empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a criterion.
    #[must_use]
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.criteria.insert(name.into(), value.into());
        self
    }

    /// Returns the criteria in canonical (sorted) order.
    #[must_use]
    pub fn criteria(&self) -> &BTreeMap<String, FieldValue> {
        &self.criteria
    }

    /// Returns the stable tag identifying this query.
    ///
    /// The tag is the hex-encoded first 16 bytes of the SHA-256 of the
    /// query's CBOR encoding. Criteria are kept sorted, so insertion order
    /// does not change the tag.
    #[must_use]
    pub fn tag(&self) -> String {
        let mut encoded = Vec::new();
        // Writing into a Vec cannot fail for these types.
        if ciborium::into_writer(&self.criteria, &mut encoded).is_err() {
            encoded.clear();
        }
        let digest = Sha256::digest(&encoded);
        hex::encode(&digest[..16])
    }
}
