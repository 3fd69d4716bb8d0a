//! SQLite persistence for groups, objects, interned metadata and the
//! access log.
//!
//! The storage engine only goes through these find/save/delete calls; it
//! never issues SQL itself.

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        group::StorageObjectGroup,
        metadata::{MetadataEntry, MetadataProperty},
        object::{StorageObject, StorageObjectAccess},
    },
};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct MetadataRepository {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    // --- objects ---

    pub async fn find_object(&self, id: Uuid) -> StorageResult<Option<StorageObject>> {
        let object = sqlx::query_as::<_, StorageObject>(
            "SELECT id, group_id, name, encrypted, digest, content_type, content_length, created_at
             FROM objects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        match object {
            Some(mut object) => {
                object.metadata = self.object_metadata(id).await?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    /// All objects, or only those of `group_id`, oldest first.
    pub async fn list_objects(&self, group_id: Option<Uuid>) -> StorageResult<Vec<StorageObject>> {
        let mut objects = match group_id {
            Some(group_id) => {
                sqlx::query_as::<_, StorageObject>(
                    "SELECT id, group_id, name, encrypted, digest, content_type, content_length, created_at
                     FROM objects WHERE group_id = ? ORDER BY created_at, id",
                )
                .bind(group_id)
                .fetch_all(&*self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, StorageObject>(
                    "SELECT id, group_id, name, encrypted, digest, content_type, content_length, created_at
                     FROM objects ORDER BY created_at, id",
                )
                .fetch_all(&*self.db)
                .await?
            }
        };

        for object in &mut objects {
            object.metadata = self.object_metadata(object.id).await?;
        }
        Ok(objects)
    }

    pub async fn insert_object(&self, object: &StorageObject) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO objects (
                id, group_id, name, encrypted, digest, content_type, content_length, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(object.id)
        .bind(object.group_id)
        .bind(&object.name)
        .bind(object.encrypted)
        .bind(&object.digest)
        .bind(&object.content_type)
        .bind(object.content_length)
        .bind(object.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            // the group was deleted after it was resolved
            if is_foreign_key_violation(&err) {
                StorageError::GroupNotFound(object.group_id.to_string())
            } else {
                StorageError::Sqlx(err)
            }
        })?;
        link_object_metadata(&mut tx, object.id, &object.metadata).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist name, group and metadata set.
    pub async fn update_object_details(&self, object: &StorageObject) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("UPDATE objects SET name = ?, group_id = ? WHERE id = ?")
            .bind(&object.name)
            .bind(object.group_id)
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound(object.id));
        }
        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        link_object_metadata(&mut tx, object.id, &object.metadata).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist the fields an overwrite may change.
    pub async fn update_content(&self, object: &StorageObject) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE objects
             SET name = ?, encrypted = ?, digest = ?, content_type = ?, content_length = ?
             WHERE id = ?",
        )
        .bind(&object.name)
        .bind(object.encrypted)
        .bind(&object.digest)
        .bind(&object.content_type)
        .bind(object.content_length)
        .bind(object.id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound(object.id));
        }
        Ok(())
    }

    /// Returns false when no such row existed.
    pub async fn delete_object(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_access(&self, access: &StorageObjectAccess) -> StorageResult<()> {
        sqlx::query("INSERT INTO object_accesses (id, object_id, accessed_at) VALUES (?, ?, ?)")
            .bind(access.id)
            .bind(access.object_id)
            .bind(access.accessed_at)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn list_accesses(&self, object_id: Uuid) -> StorageResult<Vec<StorageObjectAccess>> {
        Ok(sqlx::query_as::<_, StorageObjectAccess>(
            "SELECT id, object_id, accessed_at FROM object_accesses
             WHERE object_id = ? ORDER BY accessed_at",
        )
        .bind(object_id)
        .fetch_all(&*self.db)
        .await?)
    }

    async fn object_metadata(&self, object_id: Uuid) -> StorageResult<Vec<MetadataProperty>> {
        Ok(sqlx::query_as::<_, MetadataProperty>(
            "SELECT p.id, p.property, p.value
             FROM metadata_properties p
             JOIN object_metadata m ON m.property_id = p.id
             WHERE m.object_id = ?
             ORDER BY p.property",
        )
        .bind(object_id)
        .fetch_all(&*self.db)
        .await?)
    }

    // --- interned metadata ---

    /// Find the row for `(property, value)` or create it.
    pub async fn intern_property(&self, entry: &MetadataEntry) -> StorageResult<MetadataProperty> {
        sqlx::query(
            "INSERT INTO metadata_properties (id, property, value) VALUES (?, ?, ?)
             ON CONFLICT(property, value) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.property)
        .bind(&entry.value)
        .execute(&*self.db)
        .await?;

        Ok(sqlx::query_as::<_, MetadataProperty>(
            "SELECT id, property, value FROM metadata_properties WHERE property = ? AND value = ?",
        )
        .bind(&entry.property)
        .bind(&entry.value)
        .fetch_one(&*self.db)
        .await?)
    }

    pub async fn intern_all(&self, entries: &[MetadataEntry]) -> StorageResult<Vec<MetadataProperty>> {
        let mut properties = Vec::with_capacity(entries.len());
        for entry in entries {
            properties.push(self.intern_property(entry).await?);
        }
        Ok(properties)
    }

    // --- groups ---

    pub async fn find_group(&self, id: Uuid) -> StorageResult<Option<StorageObjectGroup>> {
        let group = sqlx::query_as::<_, StorageObjectGroup>(
            "SELECT id, name, created_at FROM object_groups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        self.hydrate_group(group).await
    }

    pub async fn find_group_by_name(&self, name: &str) -> StorageResult<Option<StorageObjectGroup>> {
        let group = sqlx::query_as::<_, StorageObjectGroup>(
            "SELECT id, name, created_at FROM object_groups WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        self.hydrate_group(group).await
    }

    pub async fn list_groups(&self) -> StorageResult<Vec<StorageObjectGroup>> {
        let groups = sqlx::query_as::<_, StorageObjectGroup>(
            "SELECT id, name, created_at FROM object_groups ORDER BY name",
        )
        .fetch_all(&*self.db)
        .await?;

        let mut hydrated = Vec::with_capacity(groups.len());
        for group in groups {
            if let Some(group) = self.hydrate_group(Some(group)).await? {
                hydrated.push(group);
            }
        }
        Ok(hydrated)
    }

    pub async fn list_group_names(&self) -> StorageResult<Vec<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT name FROM object_groups ORDER BY name")
                .fetch_all(&*self.db)
                .await?,
        )
    }

    pub async fn insert_group(&self, group: &StorageObjectGroup) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("INSERT INTO object_groups (id, name, created_at) VALUES (?, ?, ?)")
            .bind(group.id)
            .bind(&group.name)
            .bind(group.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_group_name_conflict(err, &group.name))?;
        link_group_metadata(&mut tx, group.id, &group.metadata).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_group(&self, group: &StorageObjectGroup) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("UPDATE object_groups SET name = ? WHERE id = ?")
            .bind(&group.name)
            .bind(group.id)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_group_name_conflict(err, &group.name))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::GroupNotFound(group.id.to_string()));
        }
        sqlx::query("DELETE FROM group_metadata WHERE group_id = ?")
            .bind(group.id)
            .execute(&mut *tx)
            .await?;
        link_group_metadata(&mut tx, group.id, &group.metadata).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deletes the group row only while it has no members. Returns false when
    /// the group is absent or still has objects.
    pub async fn delete_empty_group(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query(
            "DELETE FROM object_groups
             WHERE id = ? AND NOT EXISTS (SELECT 1 FROM objects WHERE group_id = ?)",
        )
        .bind(id)
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hydrate_group(
        &self,
        group: Option<StorageObjectGroup>,
    ) -> StorageResult<Option<StorageObjectGroup>> {
        let Some(mut group) = group else {
            return Ok(None);
        };

        group.metadata = sqlx::query_as::<_, MetadataProperty>(
            "SELECT p.id, p.property, p.value
             FROM metadata_properties p
             JOIN group_metadata m ON m.property_id = p.id
             WHERE m.group_id = ?
             ORDER BY p.property",
        )
        .bind(group.id)
        .fetch_all(&*self.db)
        .await?;

        group.objects = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM objects WHERE group_id = ? ORDER BY created_at, id",
        )
        .bind(group.id)
        .fetch_all(&*self.db)
        .await?;

        Ok(Some(group))
    }
}

async fn link_object_metadata(
    conn: &mut SqliteConnection,
    object_id: Uuid,
    properties: &[MetadataProperty],
) -> Result<(), sqlx::Error> {
    for property in properties {
        sqlx::query("INSERT OR IGNORE INTO object_metadata (object_id, property_id) VALUES (?, ?)")
            .bind(object_id)
            .bind(property.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn link_group_metadata(
    conn: &mut SqliteConnection,
    group_id: Uuid,
    properties: &[MetadataProperty],
) -> Result<(), sqlx::Error> {
    for property in properties {
        sqlx::query("INSERT OR IGNORE INTO group_metadata (group_id, property_id) VALUES (?, ?)")
            .bind(group_id)
            .bind(property.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn map_group_name_conflict(err: sqlx::Error, name: &str) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::DuplicateGroupName(name.to_string())
    } else {
        StorageError::Sqlx(err)
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("foreign key")
    )
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
