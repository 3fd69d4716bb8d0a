//! Plain or encrypted blob streams behind one interface.

use crate::{
    errors::{StorageError, StorageResult},
    storage::{
        accessor::BlobWriter,
        cipher::{CipherReader, CipherWriter, SEGMENT_LEN},
    },
};
use bytes::{Bytes, BytesMut};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

pub enum BlobSink {
    Plain(BlobWriter),
    Encrypted(CipherWriter<BlobWriter>),
}

impl BlobSink {
    pub async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        match self {
            BlobSink::Plain(writer) => writer.write_all(data).await.map_err(StorageError::Storage),
            BlobSink::Encrypted(writer) => writer.write(data).await,
        }
    }

    /// Finish the stream and make the blob visible.
    pub async fn commit(self) -> StorageResult<()> {
        let writer = match self {
            BlobSink::Plain(writer) => writer,
            BlobSink::Encrypted(writer) => writer.finish().await?,
        };
        writer.commit().await
    }
}

pub enum BlobSource {
    Plain(File),
    Encrypted(CipherReader<File>),
}

impl BlobSource {
    /// Next chunk of plaintext, `None` at the end of the blob.
    pub async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>> {
        match self {
            BlobSource::Plain(file) => {
                let mut buf = BytesMut::with_capacity(SEGMENT_LEN);
                let n = file.read_buf(&mut buf).await.map_err(StorageError::Storage)?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some(buf.freeze()))
                }
            }
            BlobSource::Encrypted(reader) => reader.next_chunk().await,
        }
    }
}
