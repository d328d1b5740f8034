//! Secret store adapters.
//!
//! The wrapper reads and writes credential blobs by logical key through the
//! [`SecretStore`] trait. Three backends exist:
//!
//! - [`FileSecretStore`]: one owner-only file per key under a directory,
//!   replaced atomically. Default on every platform.
//! - [`MemorySecretStore`]: process-local map, used by tests.
//! - `KeyringSecretStore` (feature `keyring`): the OS credential manager.
//!
//! All calls are blocking; async callers wrap them in `spawn_blocking`.

use crate::io::{atomic_write_private, remove_if_exists};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors from a secret store backend.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid secret key {key:?}")]
    InvalidKey { key: String },

    #[error("credential manager error: {0}")]
    Backend(String),

    #[error("secret store lock poisoned")]
    LockPoisoned,
}

/// Read/write access to named credential blobs.
pub trait SecretStore: Send + Sync {
    /// Read the blob stored under `key`; `Ok(None)` when no entry exists.
    fn read(&self, key: &str) -> Result<Option<String>, SecretStoreError>;

    /// Create or replace the blob stored under `key`.
    fn write(&self, key: &str, blob: &str) -> Result<(), SecretStoreError>;

    /// Remove the entry; deleting a missing entry is not an error.
    fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
}

/// File-per-key secret store.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, SecretStoreError> {
        if key.trim().is_empty() {
            return Err(SecretStoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        let file_name: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '_',
            })
            .collect();
        // Disambiguate keys that sanitize to the same name.
        let digest = crate::io::compute_hash(key.as_bytes());
        Ok(self
            .dir
            .join(format!("{file_name}-{}.json", &digest[..12])))
    }
}

impl SecretStore for FileSecretStore {
    fn read(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let path = self.entry_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SecretStoreError::Io { path, source }),
        }
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), SecretStoreError> {
        let path = self.entry_path(key)?;
        ensure_private_dir(&self.dir)?;
        atomic_write_private(&path, blob.as_bytes())
            .map_err(|source| SecretStoreError::Io { path, source })
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let path = self.entry_path(key)?;
        remove_if_exists(&path)
            .map(|_| ())
            .map_err(|source| SecretStoreError::Io { path, source })
    }
}

fn ensure_private_dir(dir: &Path) -> Result<(), SecretStoreError> {
    let to_err = |source| SecretStoreError::Io {
        path: dir.to_path_buf(),
        source,
    };
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(to_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(to_err)?;
    }
    Ok(())
}

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn read(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), SecretStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::LockPoisoned)?;
        entries.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Secret store backed by the OS credential manager.
///
/// Each logical key is a keyring service name; `account` is the user field.
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    account: String,
}

#[cfg(feature = "keyring")]
impl KeyringSecretStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, SecretStoreError> {
        keyring::Entry::new(key, &self.account).map_err(|e| SecretStoreError::Backend(e.to_string()))
    }
}

#[cfg(feature = "keyring")]
impl SecretStore for KeyringSecretStore {
    fn read(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretStoreError::Backend(e.to_string())),
        }
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), SecretStoreError> {
        self.entry(key)?
            .set_password(blob)
            .map_err(|e| SecretStoreError::Backend(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SecretStoreError::Backend(e.to_string())),
        }
    }
}
