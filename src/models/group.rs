//! Represents a named group of objects.

use crate::models::metadata::{MetadataEntry, MetadataProperty};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A group acts as the namespace objects are uploaded into. Names are unique.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StorageObjectGroup {
    pub id: Uuid,

    pub name: String,

    pub created_at: DateTime<Utc>,

    #[sqlx(skip)]
    pub metadata: Vec<MetadataProperty>,

    /// Ids of the member objects.
    #[sqlx(skip)]
    pub objects: Vec<Uuid>,
}

/// Client payload for creating or updating a group.
#[derive(Deserialize, Clone, Debug)]
pub struct GroupInput {
    pub name: String,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}
