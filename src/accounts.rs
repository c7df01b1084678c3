//! Operator accounts for the optional login gate.
//!
//! Accounts live in a JSON file mapping username to a salted SHA-256 digest.
//! A missing file is an empty store; a corrupt one is logged and treated as
//! empty so the gate never locks the operator out of registering again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
const SALT_LEN: usize = 16;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("username and password must not be empty")]
    EmptyField,

    #[error("user '{0}' already exists")]
    DuplicateUser(String),

    #[error("password must be at least {} characters", MIN_PASSWORD_LEN)]
    PasswordTooShort,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account store error: {0}")]
    Storage(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct StoredCredential {
    salt: String,
    hash: String,
}

impl StoredCredential {
    fn derive(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            hash: digest(&salt, password),
            salt: hex::encode(salt),
        }
    }

    fn matches(&self, password: &str) -> bool {
        match hex::decode(&self.salt) {
            Ok(salt) => digest(&salt, password) == self.hash,
            Err(_) => false,
        }
    }
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct AccountStore {
    path: PathBuf,
    accounts: BTreeMap<String, StoredCredential>,
}

impl AccountStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let accounts = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("ignoring unreadable account file {}: {}", path.display(), err);
                BTreeMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                log::warn!("cannot read account file {}: {}", path.display(), err);
                BTreeMap::new()
            }
        };
        Self { path, accounts }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.accounts.contains_key(username.trim())
    }

    /// Add an account and persist the store.
    pub fn register(&mut self, username: &str, password: &str) -> Result<(), AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::EmptyField);
        }
        if self.accounts.contains_key(username) {
            return Err(AccountError::DuplicateUser(username.to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::PasswordTooShort);
        }
        self.accounts
            .insert(username.to_string(), StoredCredential::derive(password));
        if let Err(err) = self.save() {
            self.accounts.remove(username);
            return Err(err);
        }
        log::info!("registered user {}", username);
        Ok(())
    }

    pub fn login(&self, username: &str, password: &str) -> Result<(), AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::EmptyField);
        }
        match self.accounts.get(username) {
            Some(credential) if credential.matches(password) => Ok(()),
            _ => Err(AccountError::InvalidCredentials),
        }
    }

    fn save(&self) -> Result<(), AccountError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AccountError::Storage(e.to_string()))?;
        }
        let raw = serde_json::to_string_pretty(&self.accounts)
            .map_err(|e| AccountError::Storage(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| {
            AccountError::Storage(format!("failed to write {}: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_login_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let mut store = AccountStore::open(&path);
        assert!(store.is_empty());
        store.register("operator", "wafer123").unwrap();

        let reopened = AccountStore::open(&path);
        assert!(reopened.contains("operator"));
        assert_eq!(reopened.login("operator", "wafer123"), Ok(()));
        assert_eq!(
            reopened.login("operator", "wrong-pass"),
            Err(AccountError::InvalidCredentials)
        );
        assert_eq!(
            reopened.login("nobody", "wafer123"),
            Err(AccountError::InvalidCredentials)
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("wafer123"));
    }

    #[test]
    fn register_enforces_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AccountStore::open(dir.path().join("accounts.json"));
        assert_eq!(store.register("", "secret1"), Err(AccountError::EmptyField));
        assert_eq!(store.register("op", ""), Err(AccountError::EmptyField));
        assert_eq!(store.register("op", "12345"), Err(AccountError::PasswordTooShort));
        store.register("op", "123456").unwrap();
        assert_eq!(
            store.register("op", "abcdef"),
            Err(AccountError::DuplicateUser("op".to_string()))
        );
        assert_eq!(store.login(" ", "x"), Err(AccountError::EmptyField));
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = AccountStore::open(&path);
        assert!(store.is_empty());
    }
}
