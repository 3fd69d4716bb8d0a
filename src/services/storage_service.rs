//! StorageService sequences the byte-level primitives in `crate::storage`
//! with metadata persistence and change notifications.
//!
//! Every byte-touching operation runs under the per-object lock. Writers
//! (upload, overwrite, delete) hold the write lock while the blob changes.
//! Raw reads hold the read lock until the last byte reaches the caller.

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        group::StorageObjectGroup,
        metadata::ensure_unique_keys,
        object::{
            ContentDetails, ObjectUpdate, RawObjectMetadata, StorageObject, StorageObjectAccess,
        },
    },
    services::{
        events::{
            EventBus, OBJECT_ACCESSED, OBJECT_CREATED, OBJECT_DELETED, OBJECT_OVERWRITTEN,
            OBJECT_UPDATED,
        },
        metadata_repository::MetadataRepository,
    },
    storage::{
        accessor::{BlobAccessor, StagedUpload},
        cipher::CipherStreamFactory,
        classify, filename,
        lock::{LockManager, ObjectLockGuard},
        stream::{BlobSink, BlobSource},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use std::{
    io::{self, ErrorKind},
    sync::Arc,
};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

const COPY_BUF_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct OverwriteOutcome {
    /// False when name, digest, content type, length and encryption state
    /// were all unchanged and no metadata write happened.
    pub metadata_changed: bool,
}

#[derive(Clone)]
pub struct StorageService {
    pub repo: MetadataRepository,
    pub blobs: BlobAccessor,
    pub locks: Arc<LockManager>,
    cipher: CipherStreamFactory,
    events: EventBus,
}

impl StorageService {
    pub fn new(
        repo: MetadataRepository,
        blobs: BlobAccessor,
        locks: Arc<LockManager>,
        cipher: CipherStreamFactory,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            blobs,
            locks,
            cipher,
            events,
        }
    }

    pub async fn get_object(&self, id: Uuid) -> StorageResult<StorageObject> {
        let object = self
            .repo
            .find_object(id)
            .await?
            .ok_or(StorageError::ObjectNotFound(id))?;
        debug!("Found storage object: {}", object.id);
        Ok(object)
    }

    /// All objects, or the members of `group` (id or name).
    pub async fn list_objects(&self, group: Option<&str>) -> StorageResult<Vec<StorageObject>> {
        let group_id = match group {
            Some(key) => Some(resolve_group(&self.repo, key).await?.id),
            None => None,
        };
        self.repo.list_objects(group_id).await
    }

    pub async fn list_accesses(&self, id: Uuid) -> StorageResult<Vec<StorageObjectAccess>> {
        self.get_object(id).await?;
        self.repo.list_accesses(id).await
    }

    /// Upload a new object into `group`.
    ///
    /// The record is persisted before the bytes; if writing the blob fails the
    /// record is removed again.
    pub async fn create_object<S>(
        &self,
        group: &str,
        filename: Option<&str>,
        content: S,
        content_length: Option<u64>,
        passphrase: Option<&str>,
    ) -> StorageResult<StorageObject>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let group = resolve_group(&self.repo, group).await?;
        let name = filename::sanitize(filename)?;
        let passphrase = normalize(passphrase);

        let staged = self.blobs.stage(content, content_length).await?;
        ensure_encryptable(&staged, passphrase)?;
        let object = StorageObject {
            id: Uuid::new_v4(),
            group_id: group.id,
            encrypted: passphrase.is_some(),
            digest: staged.digest.clone(),
            content_type: classify::detect(&staged.prefix, &name),
            content_length: staged.length as i64,
            name,
            created_at: Utc::now(),
            metadata: Vec::new(),
        };
        self.repo.insert_object(&object).await?;

        let written = async {
            let _guard = self.locks.write(object.id).await?;
            self.write_blob(object.id, &staged, passphrase).await
        }
        .await;

        if let Err(err) = written {
            self.discard_record(object.id).await;
            return Err(err);
        }

        self.events.publish(OBJECT_CREATED, object.id, Some(&object));
        debug!("Created storage object: {:?}", object);
        Ok(object)
    }

    /// Open an object for a raw read.
    ///
    /// Holds the read lock until the returned reader is consumed or dropped.
    /// The first chunk is decoded before returning, so a wrong passphrase is
    /// reported here rather than in the middle of the transfer.
    pub async fn open_object(
        &self,
        id: Uuid,
        passphrase: Option<&str>,
    ) -> StorageResult<ObjectReader> {
        let object = self.get_object(id).await?;
        let passphrase = normalize(passphrase);

        if object.encrypted && passphrase.is_none() {
            return Err(StorageError::KeyRequired);
        }

        let guard = self.locks.read(id).await?;
        let file = match self.blobs.open_for_read(id).await {
            Ok(file) => file,
            Err(StorageError::Storage(err)) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(id));
            }
            Err(err) => return Err(err),
        };

        let mut source = match passphrase {
            Some(passphrase) if object.encrypted => {
                BlobSource::Encrypted(self.cipher.wrap_for_decryption(file, passphrase).await?)
            }
            _ => BlobSource::Plain(file),
        };
        let pending = source.next_chunk().await?;

        let metadata = RawObjectMetadata {
            name: object.name.clone(),
            content_type: object.content_type.clone(),
            content_length: object.content_length.max(0) as u64,
        };

        Ok(ObjectReader {
            service: self.clone(),
            object_id: object.id,
            metadata,
            guard,
            source,
            pending,
        })
    }

    /// Stream the plaintext of `id` into `destination`.
    pub async fn read_object<W>(
        &self,
        id: Uuid,
        passphrase: Option<&str>,
        destination: W,
    ) -> StorageResult<RawObjectMetadata>
    where
        W: AsyncWrite + Unpin,
    {
        self.open_object(id, passphrase)
            .await?
            .copy_to(destination)
            .await
    }

    /// Replace the bytes of `id`.
    ///
    /// A `filename` renames the object and serves as the classification hint.
    /// The record is re-read under the write lock and its content fields are
    /// written back, still under the lock, only when they changed.
    pub async fn overwrite_object<S>(
        &self,
        id: Uuid,
        filename: Option<&str>,
        content: S,
        content_length: Option<u64>,
        passphrase: Option<&str>,
    ) -> StorageResult<OverwriteOutcome>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.get_object(id).await?;
        let passphrase = normalize(passphrase);
        let new_name = match filename {
            Some(_) => Some(filename::sanitize(filename)?),
            None => None,
        };

        let staged = self.blobs.stage(content, content_length).await?;
        ensure_encryptable(&staged, passphrase)?;

        let replaced = async {
            let _guard = self.locks.write(id).await?;
            // another writer or a delete may have run while we waited
            let mut object = self
                .repo
                .find_object(id)
                .await?
                .ok_or(StorageError::ObjectNotFound(id))?;

            let name = new_name.unwrap_or_else(|| object.name.clone());
            let details = ContentDetails {
                encrypted: passphrase.is_some(),
                digest: staged.digest.clone(),
                content_type: classify::detect(&staged.prefix, &name),
                content_length: staged.length as i64,
                name,
            };
            self.write_blob(id, &staged, passphrase).await?;

            let changed = details != object.content_details();
            if changed {
                object.apply_content_details(details);
                self.repo.update_content(&object).await?;
            }
            Ok((object, changed))
        }
        .await;

        let (object, metadata_changed) = match replaced {
            Ok(replaced) => replaced,
            Err(err) => {
                if matches!(err, StorageError::ObjectNotFound(_)) {
                    self.locks.remove(id);
                }
                return Err(err);
            }
        };

        self.events.publish::<()>(OBJECT_OVERWRITTEN, id, None);
        debug!("Overwrote storage object: {:?}", object);
        Ok(OverwriteOutcome { metadata_changed })
    }

    /// Change name, group and metadata. Bytes are untouched, so no lock.
    pub async fn update_object(
        &self,
        id: Uuid,
        update: ObjectUpdate,
    ) -> StorageResult<StorageObject> {
        ensure_unique_keys(&update.metadata)?;
        let mut object = self.get_object(id).await?;

        object.name = filename::sanitize(Some(&update.name))?;
        object.group_id = resolve_group(&self.repo, &update.group).await?.id;
        object.metadata = self.repo.intern_all(&update.metadata).await?;
        self.repo.update_object_details(&object).await?;

        self.events.publish(OBJECT_UPDATED, object.id, Some(&object));
        debug!("Updated storage object: {:?}", object);
        Ok(object)
    }

    /// Remove record, bytes and lock entry. Returns the last known state.
    pub async fn delete_object(&self, id: Uuid) -> StorageResult<StorageObject> {
        let object = self.get_object(id).await?;

        let removed = async {
            let _guard = self.locks.write(id).await?;
            if !self.repo.delete_object(id).await? {
                return Err(StorageError::ObjectNotFound(id));
            }
            self.blobs.delete(id).await
        }
        .await;
        if !matches!(removed, Err(StorageError::Locked(_))) {
            self.locks.remove(id);
        }
        removed?;

        self.events.publish(OBJECT_DELETED, id, Some(&object));
        debug!("Deleted storage object: {:?}", object);
        Ok(object)
    }

    /// Copy the staged plaintext into a fresh blob for `id`.
    async fn write_blob(
        &self,
        id: Uuid,
        staged: &StagedUpload,
        passphrase: Option<&str>,
    ) -> StorageResult<()> {
        let writer = self.blobs.open_for_write(id).await?;
        let mut sink = match passphrase {
            Some(passphrase) => {
                BlobSink::Encrypted(self.cipher.wrap_for_encryption(writer, passphrase).await?)
            }
            None => BlobSink::Plain(writer),
        };

        let mut source = staged.open().await?;
        let mut buf = vec![0u8; COPY_BUF_LEN];
        loop {
            let n = source.read(&mut buf).await.map_err(StorageError::Storage)?;
            if n == 0 {
                break;
            }
            sink.write(&buf[..n]).await?;
        }
        sink.commit().await
    }

    async fn discard_record(&self, id: Uuid) {
        match self.repo.delete_object(id).await {
            Ok(_) => debug!("discarded record of failed upload {}", id),
            Err(err) => warn!("failed to discard record of failed upload {}: {}", id, err),
        }
        self.locks.remove(id);
    }
}

/// A raw read in progress. Holds the object's read lock.
pub struct ObjectReader {
    service: StorageService,
    object_id: Uuid,
    metadata: RawObjectMetadata,
    guard: ObjectLockGuard,
    source: BlobSource,
    pending: Option<Bytes>,
}

impl ObjectReader {
    pub fn metadata(&self) -> &RawObjectMetadata {
        &self.metadata
    }

    /// Deliver the remaining plaintext, release the lock and log the access.
    ///
    /// A failed write to `destination` means the caller went away; it is
    /// logged and the read still completes its cleanup.
    pub async fn copy_to<W>(self, mut destination: W) -> StorageResult<RawObjectMetadata>
    where
        W: AsyncWrite + Unpin,
    {
        let ObjectReader {
            service,
            object_id,
            metadata,
            guard,
            mut source,
            mut pending,
        } = self;

        let mut delivered: u64 = 0;
        let outcome: StorageResult<()> = loop {
            let chunk = match pending.take() {
                Some(chunk) => chunk,
                None => match source.next_chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err),
                },
            };
            if let Err(err) = destination.write_all(&chunk).await {
                warn!(
                    "client disconnected while reading object {} after {} bytes: {}",
                    object_id, delivered, err
                );
                break Ok(());
            }
            delivered += chunk.len() as u64;
        };

        if let Err(err) = destination.shutdown().await {
            debug!("closing destination for object {} failed: {}", object_id, err);
        }
        drop(source);
        outcome?;

        // recorded under the read lock, so a delete cannot remove the row first
        let access = StorageObjectAccess::now(object_id);
        service.repo.insert_access(&access).await?;
        drop(guard);
        service
            .events
            .publish(OBJECT_ACCESSED, object_id, Some(&access));

        debug!("Read raw storage object {} ({} bytes)", object_id, delivered);
        Ok(metadata)
    }
}

/// Look a group up by id, falling back to its name.
pub(crate) async fn resolve_group(
    repo: &MetadataRepository,
    key: &str,
) -> StorageResult<StorageObjectGroup> {
    if let Ok(id) = Uuid::parse_str(key) {
        if let Some(group) = repo.find_group(id).await? {
            return Ok(group);
        }
    }
    repo.find_group_by_name(key)
        .await?
        .ok_or_else(|| StorageError::GroupNotFound(key.to_string()))
}

/// There is nothing to encrypt in an empty upload.
fn ensure_encryptable(staged: &StagedUpload, passphrase: Option<&str>) -> StorageResult<()> {
    if passphrase.is_some() && staged.length == 0 {
        return Err(StorageError::NothingToEncrypt);
    }
    Ok(())
}

/// An empty passphrase means "not encrypted".
fn normalize(passphrase: Option<&str>) -> Option<&str> {
    passphrase.filter(|p| !p.is_empty())
}
