//! Encrypting disk cache wrapper.
//!
//! Wraps another [`DiskCache`]: `store` encrypts then delegates, `load`
//! delegates then decrypts. Payloads are sealed with AES-256-GCM; a fresh
//! 96-bit nonce is generated per write and prefixed to the ciphertext.
//!
//! The key is generated once, persisted in the [`Keychain`](crate::Keychain),
//! and restored lazily on first use. All scopes created from the same wrapper
//! share the restored key.

use super::{DiskCache, PathStream};
use crate::error::{ErrorKind, Result};
use crate::{DiskCacheHandle, KeychainHandle};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Keychain entry holding the disk encryption key.
pub const ENCRYPTION_KEY_NAME: &str = "trove.disk_cache.encryption_key";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct EncryptedDiskCache {
    inner: DiskCacheHandle,
    keychain: KeychainHandle,
    cipher: Arc<OnceCell<Aes256Gcm>>,
}

impl EncryptedDiskCache {
    pub fn new(inner: DiskCacheHandle, keychain: KeychainHandle) -> Self {
        Self { inner, keychain, cipher: Arc::new(OnceCell::new()) }
    }

    async fn cipher(&self) -> Result<&Aes256Gcm> {
        self.cipher.get_or_try_init(|| async { self.restore_or_generate_key() }).await
    }

    fn restore_or_generate_key(&self) -> Result<Aes256Gcm> {
        if let Some(key) = self.keychain.get(ENCRYPTION_KEY_NAME)? {
            if key.len() != KEY_LEN {
                exn::bail!(ErrorKind::Encryption(format!(
                    "stored key is {} bytes, expected {KEY_LEN}",
                    key.len()
                )));
            }
            tracing::debug!("Restored disk cache encryption key from keychain");
            return Aes256Gcm::new_from_slice(&key)
                .map_err(|_| ErrorKind::Encryption("invalid key length".to_string()).into());
        }
        let key = Aes256Gcm::generate_key(OsRng);
        self.keychain.store(ENCRYPTION_KEY_NAME, key.as_slice())?;
        tracing::info!("Generated new disk cache encryption key");
        Ok(Aes256Gcm::new(&key))
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes> {
        let cipher = self.cipher().await?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| ErrorKind::Encryption("failed to encrypt payload".to_string()))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(Bytes::from(sealed))
    }

    async fn decrypt(&self, sealed: &[u8]) -> Result<Bytes> {
        if sealed.len() < NONCE_LEN {
            exn::bail!(ErrorKind::Encryption("payload shorter than nonce".to_string()));
        }
        let cipher = self.cipher().await?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ErrorKind::Encryption("failed to decrypt payload".to_string()))?;
        Ok(Bytes::from(plaintext))
    }
}

#[async_trait]
impl DiskCache for EncryptedDiskCache {
    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn load(&self, path: &Path) -> Result<Bytes> {
        let sealed = self.inner.load(path).await?;
        self.decrypt(&sealed).await
    }

    async fn load_absolute_url(&self, url: &str) -> Result<Bytes> {
        let sealed = self.inner.load_absolute_url(url).await?;
        self.decrypt(&sealed).await
    }

    async fn store(&self, path: &Path, data: Bytes) -> Result<()> {
        let sealed = self.encrypt(&data).await?;
        self.inner.store(path, sealed).await
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        self.inner.remove(path).await
    }

    fn list_stream<'a>(&'a self, path: &'a Path) -> PathStream<'a> {
        self.inner.list_stream(path)
    }

    fn absolute_url(&self, path: &Path) -> Result<String> {
        self.inner.absolute_url(path)
    }

    fn scoped(&self, subpath: &Path, allow_read_outside_scope: bool) -> Result<DiskCacheHandle> {
        Ok(Arc::new(Self {
            inner: self.inner.scoped(subpath, allow_read_outside_scope)?,
            keychain: Arc::clone(&self.keychain),
            cipher: Arc::clone(&self.cipher),
        }))
    }
}
