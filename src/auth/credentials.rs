use crate::auth::{CredentialPair, CredentialStore, StoreError};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// The in-memory credential pair together with the store that persists it.
///
/// Only reachable through the lock held by [`SharedCredentials`], so a read
/// of the pair and the durable write that follows a change cannot interleave
/// with another writer.
#[derive(Debug)]
pub struct CredentialState {
    pair: CredentialPair,
    store: CredentialStore,
}

impl CredentialState {
    /// The current pair.
    pub const fn pair(&self) -> &CredentialPair {
        &self.pair
    }

    /// Replace the pair and persist it.
    ///
    /// The in-memory pair is replaced even if the write fails. A rotated
    /// refresh token must not be lost just because the disk was unavailable;
    /// the error is returned so the caller can report it.
    pub fn replace(&mut self, pair: CredentialPair) -> Result<(), StoreError> {
        self.pair = pair;
        self.store.save(&self.pair)
    }
}

/// Cloneable handle to the single credential pair of the bridge.
///
/// The poll loop and the authorization callback both hold one of these.
#[derive(Debug, Clone)]
pub struct SharedCredentials(Arc<Mutex<CredentialState>>);

impl SharedCredentials {
    /// Load the pair from `store`. A store that cannot be read is reported
    /// and treated as empty, which sends the bridge through authorization.
    pub fn load(store: CredentialStore) -> Self {
        let pair = match store.load() {
            Ok(pair) => {
                info!(
                    path = %store.path().display(),
                    has_access_token = pair.has_access_token(),
                    has_refresh_token = pair.has_refresh_token(),
                    "credentials loaded"
                );
                pair
            }
            Err(err) => {
                warn!(%err, path = %store.path().display(), "unreadable credential file, starting without credentials");
                CredentialPair::default()
            }
        };
        Self::new(pair, store)
    }

    /// Create a handle holding `pair`, persisted to `store` on change.
    pub fn new(pair: CredentialPair, store: CredentialStore) -> Self {
        Self(Arc::new(Mutex::new(CredentialState { pair, store })))
    }

    /// A copy of the current pair.
    pub async fn snapshot(&self) -> CredentialPair {
        self.0.lock().await.pair.clone()
    }

    /// Replace and persist the pair.
    pub async fn replace(&self, pair: CredentialPair) -> Result<(), StoreError> {
        self.0.lock().await.replace(pair)
    }

    /// Lock the credentials for a read-modify-write, such as a refresh that
    /// must not race another writer.
    pub async fn lock(&self) -> MutexGuard<'_, CredentialState> {
        self.0.lock().await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn replace_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("tokens.json"));
        let creds = SharedCredentials::load(store.clone());
        assert_eq!(creds.snapshot().await, CredentialPair::default());

        creds
            .replace(CredentialPair::new("access", "refresh"))
            .await
            .unwrap();

        assert_eq!(creds.snapshot().await, CredentialPair::new("access", "refresh"));
        assert_eq!(store.load().unwrap(), CredentialPair::new("access", "refresh"));
    }

    #[tokio::test]
    async fn failed_write_still_updates_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("tokens.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let creds = SharedCredentials::new(CredentialPair::default(), CredentialStore::new(&path));
        assert!(creds.replace(CredentialPair::new("a", "r")).await.is_err());
        assert_eq!(creds.snapshot().await, CredentialPair::new("a", "r"));
    }

    #[tokio::test]
    async fn corrupt_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{").unwrap();

        let creds = SharedCredentials::load(CredentialStore::new(&path));
        assert_eq!(creds.snapshot().await, CredentialPair::default());
    }
}
