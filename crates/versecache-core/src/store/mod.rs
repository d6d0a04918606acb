//! Persistent key-value store.
//!
//! This module provides the `Storage` handle every other layer writes
//! through. Values are flat strings (JSON or primitives); typed getters
//! self-heal by evicting records they cannot parse.
//!
//! Backends:
//! - `EncryptedFileBackend`: ChaCha20-Poly1305 encrypted file, key from
//!   Argon2 over a keychain-held passphrase
//! - `MemoryBackend`: isolated in-memory map

pub mod backend;
pub mod encrypted;
pub mod key_source;
pub mod storage;

pub use backend::{MemoryBackend, StoreBackend};
pub use encrypted::EncryptedFileBackend;
pub use key_source::{KeySource, OsKeychain, SecretStore};
pub use storage::Storage;

pub(crate) use storage::is_sentinel;
