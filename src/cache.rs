//! On-disk persistence (spec §6) and the process-wide per-UUID cache
//! lock (spec §9): every network gets its own directory, gated by a
//! version file the same way the original implementation recreates
//! its whole cache directory on a version bump.
//!
//! The lock is explicitly *not* a bare global — `CacheLockRegistry` is
//! a value a host application constructs once and hands to every
//! `MeshClient` it builds, so two clients for the same network id
//! (e.g. across two tokio runtimes in tests) still serialize correctly
//! without reaching for `static`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::cloud::NetworkSession;
use crate::error::MeshError;
use crate::keystore::Keystore;
use crate::unit::UnitType;

const CACHE_VERSION: u32 = 1;
const VERSION_FILE: &str = ".cachever";

/// TTL applied to a successfully-fetched network descriptor before
/// it's considered stale and a refresh is attempted.
pub const SUCCESS_TTL: Duration = Duration::days(28);
/// Shorter TTL applied after a failed refresh attempt, so a network
/// that's briefly unreachable doesn't wedge the client offline for a
/// month on stale data.
pub const FAILURE_TTL: Duration = Duration::days(7);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
    success: bool,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let ttl = if self.success { SUCCESS_TTL } else { FAILURE_TTL };
        now - self.cached_at < ttl
    }
}

/// Persistent state this crate depends on (spec §6): one keystore, one
/// login session, and a shared fixture-type catalogue, each scoped to
/// a network id.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn load_session(&self, network_id: &str) -> Result<Option<NetworkSession>, MeshError>;
    async fn save_session(
        &self,
        network_id: &str,
        session: &NetworkSession,
    ) -> Result<(), MeshError>;

    async fn load_keystore(&self, network_id: &str) -> Result<Option<Keystore>, MeshError>;
    async fn save_keystore(&self, network_id: &str, keystore: &Keystore) -> Result<(), MeshError>;

    /// `None` if there's no entry, or if there is one but it's past its
    /// success/failure TTL and the caller should refresh from the cloud.
    async fn load_fixture(&self, type_id: u32) -> Result<Option<UnitType>, MeshError>;
    async fn save_fixture(
        &self,
        type_id: u32,
        unit_type: &UnitType,
        success: bool,
    ) -> Result<(), MeshError>;
}

/// Default `Cache` over the local filesystem, one JSON file per entry.
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    /// Prepare (or recreate, if stale) the cache root at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, MeshError> {
        let root = root.into();
        Self::ensure_valid(&root).await?;
        Ok(Self { root })
    }

    async fn ensure_valid(root: &Path) -> Result<(), MeshError> {
        let version_file = root.join(VERSION_FILE);
        if root.exists() {
            let current = tokio::fs::read_to_string(&version_file)
                .await
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());
            if current != Some(CACHE_VERSION) {
                tokio::fs::remove_dir_all(root)
                    .await
                    .map_err(|e| MeshError::NetworkUpdateError(e.to_string()))?;
            }
        }
        if !root.exists() {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|e| MeshError::NetworkUpdateError(e.to_string()))?;
            tokio::fs::write(&version_file, CACHE_VERSION.to_string())
                .await
                .map_err(|e| MeshError::NetworkUpdateError(e.to_string()))?;
        }
        Ok(())
    }

    fn network_dir(&self, network_id: &str) -> PathBuf {
        self.root.join(network_id)
    }

    fn fixture_path(&self, type_id: u32) -> PathBuf {
        self.root.join("fixtures").join(format!("{type_id}.json"))
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MeshError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MeshError::NetworkUpdateError(e.to_string()))?;
        }
        let body = serde_json::to_vec_pretty(value)
            .map_err(|e| MeshError::NetworkUpdateError(e.to_string()))?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| MeshError::NetworkUpdateError(e.to_string()))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        path: &Path,
    ) -> Result<Option<T>, MeshError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| MeshError::NetworkUpdateError(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MeshError::NetworkUpdateError(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Cache for FsCache {
    async fn load_session(&self, network_id: &str) -> Result<Option<NetworkSession>, MeshError> {
        let path = self.network_dir(network_id).join("session.json");
        Self::read_json(&path).await
    }

    async fn save_session(
        &self,
        network_id: &str,
        session: &NetworkSession,
    ) -> Result<(), MeshError> {
        let path = self.network_dir(network_id).join("session.json");
        Self::write_json(&path, session).await
    }

    async fn load_keystore(&self, network_id: &str) -> Result<Option<Keystore>, MeshError> {
        let path = self.network_dir(network_id).join("keystore.json");
        Self::read_json(&path).await
    }

    async fn save_keystore(&self, network_id: &str, keystore: &Keystore) -> Result<(), MeshError> {
        let path = self.network_dir(network_id).join("keystore.json");
        Self::write_json(&path, keystore).await
    }

    async fn load_fixture(&self, type_id: u32) -> Result<Option<UnitType>, MeshError> {
        let path = self.fixture_path(type_id);
        let entry: Option<CacheEntry<UnitType>> = Self::read_json(&path).await?;
        Ok(entry.filter(|e| e.is_fresh(Utc::now())).map(|e| e.data))
    }

    async fn save_fixture(
        &self,
        type_id: u32,
        unit_type: &UnitType,
        success: bool,
    ) -> Result<(), MeshError> {
        let entry = CacheEntry {
            data: unit_type.clone(),
            cached_at: Utc::now(),
            success,
        };
        Self::write_json(&self.fixture_path(type_id), &entry).await
    }
}

/// Process-wide registry of per-network-UUID locks. Not a `static` —
/// a host application owns one instance and shares it (e.g. via
/// `Arc`) across every `MeshClient` it constructs, per spec §9.
#[derive(Default)]
pub struct CacheLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (creating if needed) the lock scoped to `uuid`.
    pub async fn lock_for(&self, uuid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(uuid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keystore_roundtrips_through_fs_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path()).await.unwrap();

        let mut keystore = Keystore::new();
        keystore
            .add_key(crate::keystore::Key {
                id: 1,
                key_type: 0,
                role: 3,
                name: "test".to_string(),
                key: vec![0u8; 16],
            })
            .unwrap();

        cache.save_keystore("net1", &keystore).await.unwrap();
        let loaded = cache.load_keystore("net1").await.unwrap().unwrap();
        assert_eq!(loaded.keys().len(), 1);
    }

    #[tokio::test]
    async fn missing_entries_return_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path()).await.unwrap();
        assert!(cache.load_session("nope").await.unwrap().is_none());
        assert!(cache.load_fixture(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_failure_cached_fixture_is_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path()).await.unwrap();
        let unit_type = UnitType {
            id: 1,
            model: "m".to_string(),
            manufacturer: "m".to_string(),
            mode: "m".to_string(),
            state_length: 1,
            controls: Vec::new(),
        };

        let entry = CacheEntry {
            data: unit_type,
            cached_at: Utc::now() - Duration::days(8),
            success: false,
        };
        FsCache::write_json(&cache.fixture_path(1), &entry)
            .await
            .unwrap();

        assert!(cache.load_fixture(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_mismatch_recreates_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join(VERSION_FILE), "0")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("stale.txt"), "leftover")
            .await
            .unwrap();

        FsCache::new(dir.path()).await.unwrap();
        assert!(!dir.path().join("stale.txt").exists());
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join(VERSION_FILE))
                .await
                .unwrap(),
            CACHE_VERSION.to_string()
        );
    }

    #[tokio::test]
    async fn lock_registry_returns_same_lock_for_same_uuid() {
        let registry = CacheLockRegistry::new();
        let a = registry.lock_for("uuid-1").await;
        let b = registry.lock_for("uuid-1").await;
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.lock_for("uuid-2").await;
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
