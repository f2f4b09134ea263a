//! TNT credentials in the OS keychain.
//!
//! The user name and password live together as a single `user:password`
//! value under the `credentials` account, so reading them prompts for
//! keychain access at most once. Older installs kept two separate accounts;
//! those are folded into the single value the first time they are read.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::sync::Mutex;

/// Keychain service all accounts are stored under.
pub const SERVICE: &str = "com.autentia.TNTGitHook";

const CREDENTIALS_ACCOUNT: &str = "credentials";
const LEGACY_USERNAME_ACCOUNT: &str = "username";
const LEGACY_PASSWORD_ACCOUNT: &str = "password";

pub trait KeychainStore {
    fn get(&self, account: &str) -> Result<Option<String>>;
    fn set(&self, account: &str, value: &str) -> Result<()>;
    fn delete(&self, account: &str) -> Result<()>;
}

pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, account).context("failed to open keychain entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE)
    }
}

impl KeychainStore for KeyringStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        let entry = self.entry(account)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err).context("failed to read keychain entry"),
        }
    }

    fn set(&self, account: &str, value: &str) -> Result<()> {
        let entry = self.entry(account)?;
        entry
            .set_password(value)
            .context("failed to store keychain entry")?;
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<()> {
        let entry = self.entry(account)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err).context("failed to delete keychain entry"),
        }
    }
}

#[derive(Default)]
pub struct InMemoryKeychain {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeychainStore for InMemoryKeychain {
    fn get(&self, account: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(account).cloned())
    }

    fn set(&self, account: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(account.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<()> {
        self.values.lock().unwrap().remove(account);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// TNT user name and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Split a stored `user:password` value. The password may contain `:`.
    fn from_stored(value: &str) -> Self {
        match value.split_once(':') {
            Some((username, password)) => Self::new(username, password),
            None => Self::new(value, ""),
        }
    }

    fn to_stored(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }

    fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Store credentials, replacing any previous ones (legacy accounts included).
pub fn store(keychain: &dyn KeychainStore, credentials: &Credentials) -> Result<()> {
    if !credentials.is_complete() {
        bail!("user and password must not be empty");
    }
    keychain.set(CREDENTIALS_ACCOUNT, &credentials.to_stored())?;
    remove_legacy(keychain)
}

/// Read the stored credentials, migrating the legacy layout if found.
pub fn load(keychain: &dyn KeychainStore) -> Result<Credentials> {
    let credentials = match keychain.get(CREDENTIALS_ACCOUNT)? {
        Some(stored) => Credentials::from_stored(&stored),
        None => {
            let username = keychain.get(LEGACY_USERNAME_ACCOUNT)?.unwrap_or_default();
            let password = keychain.get(LEGACY_PASSWORD_ACCOUNT)?.unwrap_or_default();
            let credentials = Credentials::new(username, password);
            if credentials.is_complete() {
                keychain.set(CREDENTIALS_ACCOUNT, &credentials.to_stored())?;
            }
            credentials
        }
    };
    remove_legacy(keychain)?;

    if !credentials.is_complete() {
        bail!("No credentials supplied, use 'tnt-git-hook set-credentials' first");
    }
    Ok(credentials)
}

fn remove_legacy(keychain: &dyn KeychainStore) -> Result<()> {
    keychain.delete(LEGACY_USERNAME_ACCOUNT)?;
    keychain.delete(LEGACY_PASSWORD_ACCOUNT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
