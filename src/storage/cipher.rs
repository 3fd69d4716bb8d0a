//! Passphrase-keyed streaming encryption for stored blobs.
//!
//! Layout of an encrypted blob:
//!
//! ```text
//! "VLT1" | salt (16) | stream nonce (19) | segment* | last segment
//! ```
//!
//! Each segment is one XChaCha20-Poly1305 STREAM chunk (big-endian 32-bit
//! counter) sealing [`SEGMENT_LEN`] bytes of plaintext plus a 16-byte tag.
//! The last segment carries the "last block" flag and always holds fewer than
//! [`SEGMENT_LEN`] plaintext bytes, so a reader can tell it apart by length
//! alone. The key is derived from the passphrase and salt with Argon2id.

use crate::errors::{StorageError, StorageResult};
use argon2::{Algorithm, Argon2, Params, Version};
use bytes::Bytes;
use chacha20poly1305::{
    Key, KeyInit, XChaCha20Poly1305,
    aead::{
        generic_array::GenericArray,
        stream::{DecryptorBE32, EncryptorBE32},
    },
};
use rand::{RngCore, rngs::OsRng};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SEGMENT_LEN: usize = 64 * 1024;

const MAGIC: &[u8; 4] = b"VLT1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 19;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Builds encrypting writers and decrypting readers.
#[derive(Clone, Debug)]
pub struct CipherStreamFactory {
    kdf: Params,
}

impl Default for CipherStreamFactory {
    fn default() -> Self {
        Self {
            kdf: Params::default(),
        }
    }
}

impl CipherStreamFactory {
    /// Use explicit Argon2id cost parameters instead of the crate defaults.
    #[cfg(test)]
    pub fn with_kdf_params(kdf: Params) -> Self {
        Self { kdf }
    }

    /// Wrap `inner` so that everything written to it is encrypted.
    ///
    /// The header is written immediately; call [`CipherWriter::finish`] to
    /// seal the final segment.
    pub async fn wrap_for_encryption<W>(
        &self,
        mut inner: W,
        passphrase: &str,
    ) -> StorageResult<CipherWriter<W>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = self.derive_key(passphrase, salt).await?;
        let aead = XChaCha20Poly1305::new(Key::from_slice(&key));
        let encryptor = EncryptorBE32::from_aead(aead, GenericArray::from_slice(&nonce));

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&salt);
        header.extend_from_slice(&nonce);
        inner
            .write_all(&header)
            .await
            .map_err(StorageError::Storage)?;

        Ok(CipherWriter {
            inner,
            encryptor: Some(encryptor),
            buffer: Vec::with_capacity(SEGMENT_LEN),
        })
    }

    /// Wrap `inner` so that reads yield verified plaintext.
    ///
    /// Fails with [`StorageError::DecryptionFailed`] when the header is not
    /// one this factory wrote.
    pub async fn wrap_for_decryption<R>(
        &self,
        mut inner: R,
        passphrase: &str,
    ) -> StorageResult<CipherReader<R>>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        let read = read_full(&mut inner, &mut header).await?;
        if read < HEADER_LEN || &header[..MAGIC.len()] != MAGIC {
            return Err(StorageError::DecryptionFailed);
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&header[MAGIC.len()..MAGIC.len() + SALT_LEN]);
        let nonce = &header[MAGIC.len() + SALT_LEN..];

        let key = self.derive_key(passphrase, salt).await?;
        let aead = XChaCha20Poly1305::new(Key::from_slice(&key));
        let decryptor = DecryptorBE32::from_aead(aead, GenericArray::from_slice(nonce));

        Ok(CipherReader {
            inner,
            decryptor: Some(decryptor),
        })
    }

    /// Argon2id is CPU-bound, so it runs on the blocking pool.
    async fn derive_key(&self, passphrase: &str, salt: [u8; SALT_LEN]) -> StorageResult<[u8; 32]> {
        let params = self.kdf.clone();
        let passphrase = passphrase.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || {
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
            let mut key = [0u8; 32];
            argon2
                .hash_password_into(&passphrase, &salt, &mut key)
                .map_err(|e| StorageError::Encryption(format!("key derivation failed: {e}")))?;
            Ok(key)
        })
        .await
        .map_err(|e| StorageError::Encryption(format!("key derivation task failed: {e}")))?
    }
}

/// Encrypting writer produced by [`CipherStreamFactory::wrap_for_encryption`].
pub struct CipherWriter<W> {
    inner: W,
    encryptor: Option<EncryptorBE32<XChaCha20Poly1305>>,
    buffer: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> CipherWriter<W> {
    pub async fn write(&mut self, mut data: &[u8]) -> StorageResult<()> {
        while !data.is_empty() {
            let take = (SEGMENT_LEN - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == SEGMENT_LEN {
                let encryptor = self.encryptor.as_mut().ok_or_else(finished_error)?;
                let sealed = encryptor
                    .encrypt_next(self.buffer.as_slice())
                    .map_err(|_| StorageError::Encryption("segment sealing failed".into()))?;
                self.buffer.clear();
                self.inner
                    .write_all(&sealed)
                    .await
                    .map_err(StorageError::Storage)?;
            }
        }
        Ok(())
    }

    /// Seal the last segment, flush, and hand back the inner writer.
    pub async fn finish(mut self) -> StorageResult<W> {
        let encryptor = self.encryptor.take().ok_or_else(finished_error)?;
        let sealed = encryptor
            .encrypt_last(self.buffer.as_slice())
            .map_err(|_| StorageError::Encryption("segment sealing failed".into()))?;
        self.inner
            .write_all(&sealed)
            .await
            .map_err(StorageError::Storage)?;
        self.inner.flush().await.map_err(StorageError::Storage)?;
        Ok(self.inner)
    }
}

/// Decrypting reader produced by [`CipherStreamFactory::wrap_for_decryption`].
pub struct CipherReader<R> {
    inner: R,
    decryptor: Option<DecryptorBE32<XChaCha20Poly1305>>,
}

impl<R: AsyncRead + Unpin> CipherReader<R> {
    /// Next verified plaintext segment, or `None` once the last segment has
    /// been returned.
    pub async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>> {
        let Some(mut decryptor) = self.decryptor.take() else {
            return Ok(None);
        };

        let mut segment = vec![0u8; SEGMENT_LEN + TAG_LEN];
        let read = read_full(&mut self.inner, &mut segment).await?;
        segment.truncate(read);

        if read == SEGMENT_LEN + TAG_LEN {
            let plain = decryptor
                .decrypt_next(segment.as_slice())
                .map_err(|_| StorageError::DecryptionFailed)?;
            self.decryptor = Some(decryptor);
            return Ok(Some(Bytes::from(plain)));
        }

        let plain = decryptor
            .decrypt_last(segment.as_slice())
            .map_err(|_| StorageError::DecryptionFailed)?;
        Ok(Some(Bytes::from(plain)))
    }
}

fn finished_error() -> StorageError {
    StorageError::Encryption("cipher stream already finished".into())
}

/// Fill `buf` until it is full or the reader hits EOF; returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> StorageResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(StorageError::Storage)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
pub(crate) fn test_factory() -> CipherStreamFactory {
    // Minimal Argon2 cost keeps the suite fast.
    CipherStreamFactory::with_kdf_params(Params::new(8, 1, 1, Some(32)).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn encrypt(factory: &CipherStreamFactory, plain: &[u8], pass: &str) -> Vec<u8> {
        let mut writer = factory.wrap_for_encryption(Vec::new(), pass).await.unwrap();
        // uneven write sizes to exercise buffering
        for piece in plain.chunks(7_001) {
            writer.write(piece).await.unwrap();
        }
        writer.finish().await.unwrap()
    }

    async fn decrypt(factory: &CipherStreamFactory, sealed: Vec<u8>, pass: &str) -> StorageResult<Vec<u8>> {
        let mut reader = factory.wrap_for_decryption(Cursor::new(sealed), pass).await?;
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn round_trip_various_sizes() {
        let factory = test_factory();
        for len in [0, 1, SEGMENT_LEN - 1, SEGMENT_LEN, 2 * SEGMENT_LEN + 17] {
            let plain = sample(len);
            let sealed = encrypt(&factory, &plain, "correct horse").await;
            assert_ne!(sealed[HEADER_LEN..], plain[..], "len {len} stored in clear");
            assert_eq!(decrypt(&factory, sealed, "correct horse").await.unwrap(), plain);
        }
    }

    #[tokio::test]
    async fn wrong_passphrase_is_detected() {
        let factory = test_factory();
        let sealed = encrypt(&factory, b"secret payload", "right").await;
        assert!(matches!(
            decrypt(&factory, sealed, "wrong").await,
            Err(StorageError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let factory = test_factory();
        let mut sealed = encrypt(&factory, &sample(1000), "pass").await;
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            decrypt(&factory, sealed, "pass").await,
            Err(StorageError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn truncation_at_segment_boundary_is_detected() {
        let factory = test_factory();
        let mut sealed = encrypt(&factory, &sample(SEGMENT_LEN + 10), "pass").await;
        sealed.truncate(HEADER_LEN + SEGMENT_LEN + TAG_LEN);
        assert!(matches!(
            decrypt(&factory, sealed, "pass").await,
            Err(StorageError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn foreign_bytes_are_rejected() {
        let factory = test_factory();
        assert!(matches!(
            decrypt(&factory, b"plain text, not sealed".to_vec(), "pass").await,
            Err(StorageError::DecryptionFailed)
        ));
    }
}
