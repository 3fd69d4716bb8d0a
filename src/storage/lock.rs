//! Per-object reader/writer locks with bounded wait.
//!
//! Locks are created lazily on first acquisition and live in a concurrent
//! table keyed by object id. Readers share, writers exclude. Every acquisition
//! gives up after the configured timeout with [`StorageError::Locked`].

use crate::errors::{StorageError, StorageResult};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Held lock on one object. Released when dropped.
#[derive(Debug)]
pub enum ObjectLockGuard {
    Read(Uuid, OwnedRwLockReadGuard<()>),
    Write(Uuid, OwnedRwLockWriteGuard<()>),
}

impl ObjectLockGuard {
    pub fn object_id(&self) -> Uuid {
        match self {
            ObjectLockGuard::Read(id, _) | ObjectLockGuard::Write(id, _) => *id,
        }
    }
}

impl Drop for ObjectLockGuard {
    fn drop(&mut self) {
        debug!("Unlocked object {}", self.object_id());
    }
}

#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<Uuid, Arc<RwLock<()>>>,
    timeout: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire a shared lock on `id`.
    pub async fn read(&self, id: Uuid) -> StorageResult<ObjectLockGuard> {
        let lock = self.lock_for(id);
        match tokio::time::timeout(self.timeout, lock.read_owned()).await {
            Ok(guard) => {
                debug!("Read-locked object {}", id);
                Ok(ObjectLockGuard::Read(id, guard))
            }
            Err(_) => Err(StorageError::Locked(id)),
        }
    }

    /// Acquire an exclusive lock on `id`.
    pub async fn write(&self, id: Uuid) -> StorageResult<ObjectLockGuard> {
        let lock = self.lock_for(id);
        match tokio::time::timeout(self.timeout, lock.write_owned()).await {
            Ok(guard) => {
                debug!("Write-locked object {}", id);
                Ok(ObjectLockGuard::Write(id, guard))
            }
            Err(_) => Err(StorageError::Locked(id)),
        }
    }

    /// Drop the table entry for a deleted object.
    ///
    /// The entry stays when any guard or pending acquisition still references
    /// the lock; the table only ever holds one clone besides those.
    pub fn remove(&self, id: Uuid) {
        let removed = self
            .locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some();
        if removed {
            debug!("Removed lock for object {}", id);
        } else {
            debug!("Kept lock for object {} (absent or still referenced)", id);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, id: Uuid) -> Arc<RwLock<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(Duration::from_millis(100)))
    }

    #[tokio::test]
    async fn readers_share() {
        let locks = manager();
        let id = Uuid::new_v4();
        let first = locks.read(id).await.unwrap();
        let second = locks.read(id).await.unwrap();
        assert_eq!(first.object_id(), second.object_id());
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn writer_excludes_readers_and_writers() {
        let locks = manager();
        let id = Uuid::new_v4();
        let writer = locks.write(id).await.unwrap();

        assert!(matches!(locks.read(id).await, Err(StorageError::Locked(got)) if got == id));
        assert!(matches!(locks.write(id).await, Err(StorageError::Locked(_))));

        drop(writer);
        assert!(locks.read(id).await.is_ok());
    }

    #[tokio::test]
    async fn reader_blocks_writer() {
        let locks = manager();
        let id = Uuid::new_v4();
        let _reader = locks.read(id).await.unwrap();
        assert!(matches!(locks.write(id).await, Err(StorageError::Locked(_))));
    }

    #[tokio::test]
    async fn unrelated_objects_are_independent() {
        let locks = manager();
        let _a = locks.write(Uuid::new_v4()).await.unwrap();
        assert!(locks.write(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn waiting_writer_gets_lock_after_release() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(5)));
        let id = Uuid::new_v4();
        let first = locks.write(id).await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.write(id).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        assert!(contender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn concurrent_first_acquisitions_share_one_lock() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(5)));
        let id = Uuid::new_v4();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                tokio::spawn(async move { locks.lock_for(id) })
            })
            .collect();

        let mut seen = Vec::new();
        for task in tasks {
            seen.push(task.await.unwrap());
        }
        assert!(seen.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn remove_after_release() {
        let locks = manager();
        let id = Uuid::new_v4();
        let guard = locks.write(id).await.unwrap();

        locks.remove(id);
        assert_eq!(locks.len(), 1, "held lock must survive removal");

        drop(guard);
        locks.remove(id);
        assert_eq!(locks.len(), 0);
    }
}
