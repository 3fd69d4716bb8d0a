//! Groups are the namespaces objects are uploaded into. Deleting a group
//! deletes every member object through the regular object delete path, so
//! the same locking and blob cleanup applies.

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        group::{GroupInput, StorageObjectGroup},
        metadata::ensure_unique_keys,
    },
    services::{
        events::{EventBus, GROUP_CREATED, GROUP_DELETED, GROUP_UPDATED},
        metadata_repository::MetadataRepository,
        storage_service::{StorageService, resolve_group},
    },
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct GroupService {
    repo: MetadataRepository,
    objects: StorageService,
    events: EventBus,
}

impl GroupService {
    pub fn new(repo: MetadataRepository, objects: StorageService, events: EventBus) -> Self {
        Self {
            repo,
            objects,
            events,
        }
    }

    /// Look up by id or name.
    pub async fn get_group(&self, key: &str) -> StorageResult<StorageObjectGroup> {
        resolve_group(&self.repo, key).await
    }

    pub async fn list_groups(&self) -> StorageResult<Vec<StorageObjectGroup>> {
        self.repo.list_groups().await
    }

    pub async fn list_group_names(&self) -> StorageResult<Vec<String>> {
        self.repo.list_group_names().await
    }

    pub async fn create_group(&self, input: GroupInput) -> StorageResult<StorageObjectGroup> {
        ensure_unique_keys(&input.metadata)?;
        let name = group_name(&input.name)?;
        self.ensure_name_free(&name, None).await?;

        let group = StorageObjectGroup {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
            metadata: self.repo.intern_all(&input.metadata).await?,
            objects: Vec::new(),
        };
        self.repo.insert_group(&group).await?;

        self.events.publish(GROUP_CREATED, group.id, Some(&group));
        info!("Created storage object group `{}` ({})", group.name, group.id);
        Ok(group)
    }

    /// Rename the group and replace its metadata.
    pub async fn update_group(
        &self,
        key: &str,
        input: GroupInput,
    ) -> StorageResult<StorageObjectGroup> {
        ensure_unique_keys(&input.metadata)?;
        let mut group = self.get_group(key).await?;
        let name = group_name(&input.name)?;
        self.ensure_name_free(&name, Some(group.id)).await?;

        group.name = name;
        group.metadata = self.repo.intern_all(&input.metadata).await?;
        self.repo.update_group(&group).await?;

        self.events.publish(GROUP_UPDATED, group.id, Some(&group));
        debug!("Updated storage object group: {:?}", group);
        Ok(group)
    }

    /// Delete every member object, then the group itself.
    ///
    /// Uploads may land in the group while members are being deleted, so
    /// the row only goes once a re-read finds the group empty.
    pub async fn delete_group(&self, key: &str) -> StorageResult<StorageObjectGroup> {
        let mut group = self.get_group(key).await?;
        let mut members = group.objects.clone();
        group.objects.clear();

        loop {
            for object_id in members {
                match self.objects.delete_object(object_id).await {
                    Ok(_) => group.objects.push(object_id),
                    Err(StorageError::ObjectNotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            if self.repo.delete_empty_group(group.id).await? {
                break;
            }
            members = match self.repo.find_group(group.id).await? {
                Some(current) => current.objects,
                None => return Err(StorageError::GroupNotFound(key.to_string())),
            };
            debug!(
                "group `{}` gained {} objects during delete",
                group.name,
                members.len()
            );
        }

        self.events.publish(GROUP_DELETED, group.id, Some(&group));
        info!(
            "Deleted storage object group `{}` with {} objects",
            group.name,
            group.objects.len()
        );
        Ok(group)
    }

    async fn ensure_name_free(&self, name: &str, owner: Option<Uuid>) -> StorageResult<()> {
        match self.repo.find_group_by_name(name).await? {
            Some(existing) if Some(existing.id) != owner => {
                Err(StorageError::DuplicateGroupName(name.to_string()))
            }
            _ => Ok(()),
        }
    }
}

fn group_name(raw: &str) -> StorageResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StorageError::InvalidName("group name must not be empty".into()));
    }
    Ok(name.to_string())
}
