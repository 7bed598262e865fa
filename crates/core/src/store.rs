//! Durable key-value storage for session credentials
//!
//! The session manager is the only writer. Everything else reads the
//! session through the manager's accessors, never through these keys.

use crate::{CoreError, CoreResult, CredentialPair, SessionProfile};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Storage keys, shared with the browser dashboard's local storage layout
pub struct StoreKeys;

impl StoreKeys {
    pub const ACCESS_TOKEN: &'static str = "token";
    pub const REFRESH_TOKEN: &'static str = "refreshToken";
    pub const PROFILE: &'static str = "user";
    pub const SIDEBAR_COLLAPSED: &'static str = "sidebarCollapsed";
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> CoreResult<()>;
    async fn remove(&self, key: &str) -> CoreResult<()>;
    /// Remove every key, including preferences
    async fn clear(&self) -> CoreResult<()>;
}

/// Load the persisted token pair, if both halves are present
pub async fn load_credentials(store: &dyn CredentialStore) -> CoreResult<Option<CredentialPair>> {
    let access = store.get(StoreKeys::ACCESS_TOKEN).await?;
    let refresh = store.get(StoreKeys::REFRESH_TOKEN).await?;
    Ok(match (access, refresh) {
        (Some(access), Some(refresh)) => Some(CredentialPair::new(access, refresh)),
        (Some(access), None) => Some(CredentialPair::new(access, String::new())),
        _ => None,
    })
}

/// Persist both halves of the token pair
pub async fn save_credentials(
    store: &dyn CredentialStore,
    credentials: &CredentialPair,
) -> CoreResult<()> {
    store
        .set(StoreKeys::ACCESS_TOKEN, &credentials.access_token)
        .await?;
    store
        .set(StoreKeys::REFRESH_TOKEN, &credentials.refresh_token)
        .await
}

pub async fn load_profile(store: &dyn CredentialStore) -> CoreResult<Option<SessionProfile>> {
    match store.get(StoreKeys::PROFILE).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn save_profile(store: &dyn CredentialStore, profile: &SessionProfile) -> CoreResult<()> {
    let serialized = serde_json::to_string(profile)?;
    store.set(StoreKeys::PROFILE, &serialized).await
}

/// Process-local store, lost on exit. Used by tests and short-lived tools.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> CoreResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| CoreError::internal_error("memory store lock poisoned"))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    async fn clear(&self) -> CoreResult<()> {
        self.entries()?.clear();
        Ok(())
    }
}

/// JSON file store that survives process restarts.
///
/// Every mutation rewrites the whole file through a temporary sibling and
/// a rename, so a crash never leaves a half-written file behind.
pub struct FileStore {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Store at `<state_dir>/session.json`
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> CoreResult<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_all(&self, entries: &HashMap<String, String>) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote credential store: {:?}", self.path);
        Ok(())
    }

    async fn update<F>(&self, mutate: F) -> CoreResult<()>
    where
        F: FnOnce(&mut HashMap<String, String>) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        mutate(&mut entries);
        self.write_all(&entries).await
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
        .await
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        self.update(|entries| {
            entries.remove(key);
        })
        .await
    }

    async fn clear(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// Mock implementation for testing
#[cfg(any(test, feature = "tests"))]
pub mod mock {
    use super::*;
    use mockall::mock;

    mock! {
        pub CredentialStore {}

        #[async_trait]
        impl CredentialStore for CredentialStore {
            async fn get(&self, key: &str) -> CoreResult<Option<String>>;
            async fn set(&self, key: &str, value: &str) -> CoreResult<()>;
            async fn remove(&self, key: &str) -> CoreResult<()>;
            async fn clear(&self) -> CoreResult<()>;
        }
    }
}
