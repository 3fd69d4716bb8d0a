//! Key-value metadata shared between objects and groups.

use crate::errors::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;
use uuid::Uuid;

/// An interned `(property, value)` pair.
///
/// One row exists per distinct pair; every object or group declaring the
/// same pair references it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct MetadataProperty {
    pub id: Uuid,
    pub property: String,
    pub value: String,
}

/// A metadata pair as supplied by a client, before interning.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    pub property: String,
    pub value: String,
}

/// Reject sets that declare the same property key twice.
pub fn ensure_unique_keys(entries: &[MetadataEntry]) -> StorageResult<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.property.as_str()) {
            return Err(StorageError::DuplicateMetadataKey(entry.property.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(property: &str, value: &str) -> MetadataEntry {
        MetadataEntry {
            property: property.into(),
            value: value.into(),
        }
    }

    #[test]
    fn duplicate_key_with_different_value_is_rejected() {
        let entries = [entry("author", "a"), entry("author", "b")];
        assert!(matches!(
            ensure_unique_keys(&entries),
            Err(StorageError::DuplicateMetadataKey(key)) if key == "author"
        ));
    }

    #[test]
    fn distinct_keys_pass() {
        assert!(ensure_unique_keys(&[entry("author", "a"), entry("year", "2022")]).is_ok());
        assert!(ensure_unique_keys(&[]).is_ok());
    }
}
