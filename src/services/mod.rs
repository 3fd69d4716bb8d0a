pub mod events;
pub mod group_service;
pub mod metadata_repository;
pub mod storage_service;

#[cfg(test)]
pub(crate) mod test_support {
    use super::{
        events::EventBus, group_service::GroupService, metadata_repository::MetadataRepository,
        storage_service::StorageService,
    };
    use crate::storage::{accessor::BlobAccessor, cipher, lock::LockManager};
    use bytes::Bytes;
    use futures::{Stream, stream};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::{io, sync::Arc, time::Duration};
    use tempfile::TempDir;

    /// One connection that never expires, so the in-memory database lives as
    /// long as the pool.
    pub async fn memory_repository() -> MetadataRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = MetadataRepository::new(Arc::new(pool));
        repo.migrate().await.unwrap();
        repo
    }

    /// Request body split into small chunks.
    pub fn body(data: &[u8]) -> impl Stream<Item = io::Result<Bytes>> + use<> {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(4096)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        stream::iter(chunks)
    }

    pub struct Harness {
        pub _dir: TempDir,
        pub objects: StorageService,
        pub groups: GroupService,
        pub events: EventBus,
    }

    impl Harness {
        pub async fn new() -> Self {
            Self::with_lock_timeout(Duration::from_millis(200)).await
        }

        pub async fn with_lock_timeout(timeout: Duration) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let repo = memory_repository().await;
            let blobs = BlobAccessor::new(dir.path()).unwrap();
            let events = EventBus::default();
            let objects = StorageService::new(
                repo.clone(),
                blobs,
                Arc::new(LockManager::new(timeout)),
                cipher::test_factory(),
                events.clone(),
            );
            let groups = GroupService::new(repo, objects.clone(), events.clone());
            Self {
                _dir: dir,
                objects,
                groups,
                events,
            }
        }
    }
}
