//! Where the store passphrase comes from.
//!
//! On devices the passphrase is a random string kept in the OS keychain and
//! generated on first launch. Tests and headless tools pass one explicitly.

use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use keyring::Entry;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use tracing::info;

const SERVICE_NAME: &str = "versecache";

/// Keychain account holding the store passphrase
const STORE_KEY_ACCOUNT: &str = "store-key";

const PASSPHRASE_LEN: usize = 48;

/// Secret storage keyed by account name.
pub trait SecretStore: Send + Sync + fmt::Debug {
    fn load(&self, account: &str) -> Result<Option<String>>;
    fn save(&self, account: &str, secret: &str) -> Result<()>;
    fn remove(&self, account: &str) -> Result<()>;
}

/// The platform credential store (Keychain, Credential Manager, kernel keyutils).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeychain;

impl SecretStore for OsKeychain {
    fn load(&self, account: &str) -> Result<Option<String>> {
        let entry = Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve store key from keychain"),
        }
    }

    fn save(&self, account: &str, secret: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")?;
        entry
            .set_password(secret)
            .context("Failed to store store key in keychain")
    }

    fn remove(&self, account: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete store key from keychain"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum KeySource {
    Keychain {
        account: String,
        secrets: Arc<dyn SecretStore>,
    },
    Passphrase(String),
}

impl KeySource {
    pub fn keychain() -> Self {
        Self::keychain_with(Arc::new(OsKeychain))
    }

    pub fn keychain_with(secrets: Arc<dyn SecretStore>) -> Self {
        KeySource::Keychain {
            account: STORE_KEY_ACCOUNT.to_string(),
            secrets,
        }
    }

    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        KeySource::Passphrase(passphrase.into())
    }

    /// Produce the passphrase, creating and storing one in the keychain if needed.
    pub fn resolve(&self) -> Result<String> {
        match self {
            KeySource::Passphrase(passphrase) => Ok(passphrase.clone()),
            KeySource::Keychain { account, secrets } => {
                if let Some(passphrase) = secrets.load(account)? {
                    return Ok(passphrase);
                }
                let passphrase = generate_passphrase();
                secrets.save(account, &passphrase)?;
                // Read back so a store that silently drops writes fails here.
                match secrets.load(account)? {
                    Some(stored) if stored == passphrase => {
                        info!("Generated new store key in OS keychain");
                        Ok(passphrase)
                    }
                    _ => bail!("Keychain did not retain the generated store key"),
                }
            }
        }
    }

    /// Produce the passphrase an existing store was written with. Never
    /// generates one: a missing keychain entry is an error.
    pub fn existing(&self) -> Result<String> {
        match self {
            KeySource::Passphrase(passphrase) => Ok(passphrase.clone()),
            KeySource::Keychain { account, secrets } => match secrets.load(account)? {
                Some(passphrase) => Ok(passphrase),
                None => bail!("No store key in keychain for an existing store"),
            },
        }
    }

    /// Remove the keychain passphrase. The store file is unreadable afterwards.
    pub fn forget(&self) -> Result<()> {
        if let KeySource::Keychain { account, secrets } = self {
            secrets.remove(account)?;
        }
        Ok(())
    }
}

fn generate_passphrase() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(PASSPHRASE_LEN)
        .map(char::from)
        .collect()
}
