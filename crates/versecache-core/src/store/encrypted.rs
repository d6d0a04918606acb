//! Encrypted, file-backed store.
//!
//! The whole map lives in memory and is mirrored to one file on every
//! mutation. File layout:
//!
//! ```text
//! | "VCS1" | salt (16) | nonce (12) | ChaCha20-Poly1305(JSON map) |
//! ```
//!
//! Writes go to a sibling temp file which is synced and renamed over the
//! store, so a crash leaves either the old or the new map on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use super::backend::StoreBackend;
use crate::error::StoreError;

const MAGIC: &[u8; 4] = b"VCS1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

pub struct EncryptedFileBackend {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    entries: Mutex<BTreeMap<String, String>>,
}

impl EncryptedFileBackend {
    /// Open the store at `path`, creating an empty one if the file is missing.
    ///
    /// A file that exists but cannot be decrypted or parsed is an error; use
    /// [`EncryptedFileBackend::reset`] to discard it explicitly.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            return Self::create(path, passphrase);
        }

        let bytes = fs::read(&path)?;
        let (salt, nonce, ciphertext) = split_header(&bytes)?;
        let cipher = derive_cipher(passphrase, &salt)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Decryption)?;
        let entries: BTreeMap<String, String> = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        debug!(path = %path.display(), keys = entries.len(), "Opened encrypted store");
        Ok(Self {
            path,
            salt,
            cipher,
            entries: Mutex::new(entries),
        })
    }

    /// Delete whatever is at `path` and start an empty store with a new salt.
    pub fn reset(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StoreError> {
        let path = path.into();
        if path.exists() {
            fs::remove_file(&path)?;
            info!(path = %path.display(), "Discarded existing store file");
        }
        Self::create(path, passphrase)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(path: PathBuf, passphrase: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let cipher = derive_cipher(passphrase, &salt)?;

        let backend = Self {
            path,
            salt,
            cipher,
            entries: Mutex::new(BTreeMap::new()),
        };
        backend.persist(&BTreeMap::new())?;
        info!(path = %backend.path.display(), "Created encrypted store");
        Ok(backend)
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let plaintext = serde_json::to_vec(entries)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| StoreError::Encryption)?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&out)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StoreBackend for EncryptedFileBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory in step with what is on disk.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut entries = self.entries();
        let removed: Vec<(String, String)> = keys
            .iter()
            .filter_map(|key| entries.remove_entry(key))
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persist(&entries) {
            entries.extend(removed);
            return Err(e);
        }
        Ok(removed.len())
    }

    fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn all_keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut entries = self.entries();
        self.persist(&BTreeMap::new())?;
        entries.clear();
        Ok(())
    }
}

fn split_header(bytes: &[u8]) -> Result<([u8; SALT_LEN], &[u8], &[u8]), StoreError> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(StoreError::Corrupt("missing store header".to_string()));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + SALT_LEN]);
    let nonce = &bytes[MAGIC.len() + SALT_LEN..HEADER_LEN];
    Ok((salt, nonce, &bytes[HEADER_LEN..]))
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305, StoreError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.vcs");

        let store = EncryptedFileBackend::open(&path, "passphrase").unwrap();
        store.set("theme", "dark").unwrap();
        store.set("font-size", "18").unwrap();
        store.delete("theme").unwrap();
        drop(store);

        let reopened = EncryptedFileBackend::open(&path, "passphrase").unwrap();
        assert_eq!(reopened.get("font-size").as_deref(), Some("18"));
        assert!(!reopened.contains("theme"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_delete_many_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.vcs");

        let store = EncryptedFileBackend::open(&path, "passphrase").unwrap();
        for key in ["cache:a", "cache:b", "cache:c"] {
            store.set(key, "{}").unwrap();
        }
        let doomed = vec!["cache:a".to_string(), "cache:c".to_string(), "cache:zz".to_string()];
        assert_eq!(store.delete_many(&doomed).unwrap(), 2);
        assert_eq!(store.delete_many(&doomed).unwrap(), 0);
        drop(store);

        let reopened = EncryptedFileBackend::open(&path, "passphrase").unwrap();
        assert_eq!(reopened.all_keys(), vec!["cache:b"]);
    }

    #[test]
    fn test_file_does_not_contain_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.vcs");

        let store = EncryptedFileBackend::open(&path, "passphrase").unwrap();
        store.set("bookmark", "al-kahf verse 10").unwrap();

        let raw = fs::read(&path).unwrap();
        assert_eq!(&raw[..4], MAGIC);
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("al-kahf"));
        assert!(!haystack.contains("bookmark"));
    }

    #[test]
    fn test_wrong_passphrase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.vcs");
        EncryptedFileBackend::open(&path, "right")
            .unwrap()
            .set("k", "v")
            .unwrap();

        let result = EncryptedFileBackend::open(&path, "wrong");
        assert!(matches!(result, Err(StoreError::Decryption)));
    }

    #[test]
    fn test_garbage_file_is_corrupt_and_reset_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.vcs");
        fs::write(&path, b"not a store").unwrap();

        assert!(matches!(
            EncryptedFileBackend::open(&path, "key"),
            Err(StoreError::Corrupt(_))
        ));

        let store = EncryptedFileBackend::reset(&path, "key").unwrap();
        assert!(store.all_keys().is_empty());
        store.set("k", "v").unwrap();
        assert_eq!(
            EncryptedFileBackend::open(&path, "key").unwrap().get("k").as_deref(),
            Some("v")
        );
    }

    #[test]
    fn test_clear_all_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.vcs");

        let store = EncryptedFileBackend::open(&path, "key").unwrap();
        store.set("a", "1").unwrap();
        store.clear_all().unwrap();
        drop(store);

        assert!(EncryptedFileBackend::open(&path, "key")
            .unwrap()
            .all_keys()
            .is_empty());
    }
}
