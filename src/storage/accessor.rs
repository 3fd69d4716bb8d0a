//! On-disk blob storage keyed by object id.
//!
//! Every blob lives at `<root>/<object id>`. Writers stream into a
//! `.tmp-*` file next to it and rename into place on commit, so readers only
//! ever see complete blobs. Uploads are first spooled to a `.upload-*` file
//! (see [`BlobAccessor::stage`]) which is read again when the blob is written.

use crate::{
    errors::{StorageError, StorageResult},
    storage::{classify::SNIFF_LEN, digest::ContentDigest},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncWrite, AsyncWriteExt},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Reasons the configured storage root cannot be used. Fatal at startup.
#[derive(Debug, Error)]
pub enum InvalidStorageRoot {
    #[error("the provided storage path `{0}` is not absolute")]
    NotAbsolute(PathBuf),
    #[error("the provided storage path `{0}` does not exist")]
    Missing(PathBuf),
    #[error("the provided storage path `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error("the provided storage path `{0}` is not readable and writable: {1}")]
    NotAccessible(PathBuf, #[source] io::Error),
}

#[derive(Clone, Debug)]
pub struct BlobAccessor {
    root: PathBuf,
}

impl BlobAccessor {
    /// Validate `root` and build an accessor on it.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, InvalidStorageRoot> {
        let root = root.into();

        if !root.is_absolute() {
            return Err(InvalidStorageRoot::NotAbsolute(root));
        }
        let meta = match std::fs::metadata(&root) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(InvalidStorageRoot::Missing(root));
            }
            Err(err) => return Err(InvalidStorageRoot::NotAccessible(root, err)),
        };
        if !meta.is_dir() {
            return Err(InvalidStorageRoot::NotADirectory(root));
        }
        if let Err(err) = probe_read_write(&root) {
            return Err(InvalidStorageRoot::NotAccessible(root, err));
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the committed blob for `id`.
    pub fn blob_path(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Start writing a new blob for `id`. Nothing is visible until
    /// [`BlobWriter::commit`].
    pub async fn open_for_write(&self, id: Uuid) -> StorageResult<BlobWriter> {
        let tmp_path = self.root.join(format!(".tmp-{}-{}", id, Uuid::new_v4()));
        let file = File::create(&tmp_path)
            .await
            .map_err(StorageError::Storage)?;
        Ok(BlobWriter {
            file,
            tmp_path,
            final_path: self.blob_path(id),
            committed: false,
        })
    }

    pub async fn open_for_read(&self, id: Uuid) -> StorageResult<File> {
        File::open(self.blob_path(id))
            .await
            .map_err(StorageError::Storage)
    }

    /// Remove the bytes of `id`. A blob that is already gone is fine.
    pub async fn delete(&self, id: Uuid) -> StorageResult<()> {
        let path = self.blob_path(id);
        match fs::remove_file(&path).await {
            Ok(_) => {
                debug!("removed physical file {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(StorageError::Storage(err)),
        }
    }

    #[cfg(test)]
    pub async fn exists(&self, id: Uuid) -> bool {
        fs::try_exists(self.blob_path(id)).await.unwrap_or(false)
    }

    /// Spool an upload to disk while computing its digest and length.
    ///
    /// `expected_len`, when given, must equal the number of bytes received.
    pub async fn stage<S>(&self, stream: S, expected_len: Option<u64>) -> StorageResult<StagedUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let path = self.root.join(format!(".upload-{}", Uuid::new_v4()));
        let mut file = File::create(&path).await.map_err(StorageError::Storage)?;
        let mut staged = StagedUpload {
            path,
            digest: String::new(),
            length: 0,
            prefix: Vec::with_capacity(SNIFF_LEN),
        };

        let mut digest = ContentDigest::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(StorageError::UploadInterrupted)?;
            if staged.prefix.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - staged.prefix.len()).min(chunk.len());
                staged.prefix.extend_from_slice(&chunk[..take]);
            }
            digest.update(&chunk);
            staged.length += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(StorageError::Storage)?;
        }
        file.flush().await.map_err(StorageError::Storage)?;

        if let Some(expected) = expected_len {
            if expected != staged.length {
                return Err(StorageError::LengthMismatch {
                    expected,
                    actual: staged.length,
                });
            }
        }

        staged.digest = digest.finalize();
        Ok(staged)
    }
}

fn probe_read_write(root: &Path) -> io::Result<()> {
    std::fs::read_dir(root)?;
    let probe = root.join(format!(".probe-{}", Uuid::new_v4()));
    std::fs::write(&probe, b"probe")?;
    std::fs::remove_file(&probe)
}

/// An upload spooled to disk. The spool file is removed on drop.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    /// SHA-256 of the received plaintext.
    pub digest: String,
    pub length: u64,
    /// Leading bytes for content classification.
    pub prefix: Vec<u8>,
}

impl StagedUpload {
    pub async fn open(&self) -> StorageResult<File> {
        File::open(&self.path).await.map_err(StorageError::Storage)
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!("failed to remove spool file {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Output stream for one blob. Dropping it without [`commit`](Self::commit)
/// discards everything written.
#[derive(Debug)]
pub struct BlobWriter {
    file: File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl BlobWriter {
    /// Flush, fsync and atomically move the blob into place, replacing any
    /// previous bytes for the same object.
    pub async fn commit(mut self) -> StorageResult<()> {
        self.file.flush().await.map_err(StorageError::Storage)?;
        self.file.sync_all().await.map_err(StorageError::Storage)?;
        fs::rename(&self.tmp_path, &self.final_path)
            .await
            .map_err(StorageError::Storage)?;
        self.committed = true;
        debug!("committed blob {}", self.final_path.display());
        Ok(())
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.tmp_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove temporary blob {}: {}",
                    self.tmp_path.display(),
                    err
                );
            }
        }
    }
}

impl AsyncWrite for BlobWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}
