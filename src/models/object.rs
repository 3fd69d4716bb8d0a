//! Represents a stored object and its access log.

use crate::models::metadata::MetadataProperty;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single stored object (blob) within a group.
///
/// The struct holds metadata only; the bytes live under the storage root,
/// named by `id`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StorageObject {
    /// Server-generated identifier, stable for the object's lifetime.
    pub id: Uuid,

    /// Owning group.
    pub group_id: Uuid,

    /// Sanitized filename.
    pub name: String,

    /// Whether the stored bytes are passphrase-encrypted.
    pub encrypted: bool,

    /// SHA-256 (hex) of the plaintext, never of the ciphertext.
    pub digest: String,

    pub content_type: String,

    /// Plaintext length in bytes.
    pub content_length: i64,

    pub created_at: DateTime<Utc>,

    #[sqlx(skip)]
    pub metadata: Vec<MetadataProperty>,
}

/// Fields an overwrite may change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDetails {
    pub name: String,
    pub encrypted: bool,
    pub digest: String,
    pub content_type: String,
    pub content_length: i64,
}

impl StorageObject {
    pub fn content_details(&self) -> ContentDetails {
        ContentDetails {
            name: self.name.clone(),
            encrypted: self.encrypted,
            digest: self.digest.clone(),
            content_type: self.content_type.clone(),
            content_length: self.content_length,
        }
    }

    pub fn apply_content_details(&mut self, details: ContentDetails) {
        self.name = details.name;
        self.encrypted = details.encrypted;
        self.digest = details.digest;
        self.content_type = details.content_type;
        self.content_length = details.content_length;
    }
}

/// One successful raw read of an object.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StorageObjectAccess {
    pub id: Uuid,
    pub object_id: Uuid,
    pub accessed_at: DateTime<Utc>,
}

impl StorageObjectAccess {
    pub fn now(object_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            object_id,
            accessed_at: Utc::now(),
        }
    }
}

/// What a raw read reports back to the caller before the bytes.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RawObjectMetadata {
    pub name: String,
    pub content_type: String,
    pub content_length: u64,
}

/// Metadata-only changes to an object.
#[derive(Deserialize, Clone, Debug)]
pub struct ObjectUpdate {
    pub name: String,
    /// Group id or name.
    pub group: String,
    #[serde(default)]
    pub metadata: Vec<crate::models::metadata::MetadataEntry>,
}
