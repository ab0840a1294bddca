//! Integration tests for [`TorrentManager`] driven against an
//! in-memory [`TorrentBackend`] double instead of a live swarm,
//! following the same recording-double pattern used to test
//! orchestrator-style state machines elsewhere in the corpus.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use torrentvault::backend::{AddSpec, BackendHandle, BackendStats, TorrentBackend};
use torrentvault::config::ManagerConfig;
use torrentvault::error::Result;
use torrentvault::infohash::Infohash;
use torrentvault::manager::{FlowControlMsg, TorrentManager};

/// Records every call it receives and never resolves metainfo, so
/// torrents it backs stay pending indefinitely unless a test drives
/// them forward directly.
struct RecordingBackend {
    next_id: AtomicU64,
    roots: Mutex<HashMap<BackendHandle, PathBuf>>,
}

impl RecordingBackend {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            roots: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TorrentBackend for RecordingBackend {
    async fn add(&self, spec: AddSpec<'_>) -> Result<BackendHandle> {
        let storage_root = match &spec {
            AddSpec::File { storage_root, .. } => storage_root.to_path_buf(),
            AddSpec::Magnet { storage_root, .. } => storage_root.to_path_buf(),
            AddSpec::Bytes { storage_root, .. } => storage_root.to_path_buf(),
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = BackendHandle(id);
        self.roots.lock().await.insert(handle, storage_root);
        Ok(handle)
    }

    async fn metainfo(&self, _handle: BackendHandle) -> Option<Vec<u8>> {
        None
    }

    async fn stats(&self, _handle: BackendHandle) -> BackendStats {
        BackendStats::default()
    }

    async fn set_piece_window(&self, _handle: BackendHandle, _start: u32, _count: u32) -> Result<()> {
        Ok(())
    }

    async fn set_max_conns(&self, _handle: BackendHandle, _conns: u32) -> Result<()> {
        Ok(())
    }

    async fn set_trackers(&self, _handle: BackendHandle, _trackers: &[String]) -> Result<()> {
        Ok(())
    }

    async fn pause(&self, _handle: BackendHandle) -> Result<()> {
        Ok(())
    }

    async fn resume(&self, _handle: BackendHandle) -> Result<()> {
        Ok(())
    }

    async fn readd(&self, handle: BackendHandle, spec: AddSpec<'_>) -> Result<BackendHandle> {
        self.roots.lock().await.remove(&handle);
        self.add(spec).await
    }

    async fn storage_root(&self, handle: BackendHandle) -> Option<PathBuf> {
        self.roots.lock().await.get(&handle).cloned()
    }
}

fn test_config(data_dir: &std::path::Path) -> ManagerConfig {
    let mut config = ManagerConfig::load_from("nonexistent.toml").unwrap();
    config.storage.data_dir = data_dir.to_path_buf();
    config.timing.query_time_interval_secs = 1;
    config
}

#[tokio::test]
async fn add_infohash_is_idempotent_and_does_not_reset_bytes_requested() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());
    let backend = Arc::new(RecordingBackend::new());
    let manager = TorrentManager::new(config, backend).await.unwrap();

    let infohash = Infohash::from_bytes([0x42u8; 20]);

    let first = manager.add_infohash(infohash, 10 * 1024 * 1024).await.unwrap();
    assert_eq!(first, infohash);

    let snapshot_after_first = manager.get_torrent(infohash).await.unwrap();
    assert_eq!(snapshot_after_first.bytes_requested, 10 * 1024 * 1024);

    // Second admission with a different (lower) quota must not reset
    // the existing bytes_requested: it just returns the same handle.
    let second = manager.add_infohash(infohash, 1024).await.unwrap();
    assert_eq!(second, infohash);

    let snapshot_after_second = manager.get_torrent(infohash).await.unwrap();
    assert_eq!(snapshot_after_second.bytes_requested, 10 * 1024 * 1024);

    manager.close().await;
}

#[tokio::test]
async fn update_torrent_raises_quota_but_never_lowers_it() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());
    let backend = Arc::new(RecordingBackend::new());
    let manager = TorrentManager::new(config, backend).await.unwrap();

    let infohash = Infohash::from_bytes([0x7au8; 20]);
    manager.add_infohash(infohash, 4 * 1024 * 1024).await.unwrap();

    manager
        .update_torrent(FlowControlMsg {
            infohash,
            bytes_requested: 2 * 1024 * 1024,
            is_create: false,
        })
        .await
        .unwrap();

    // Give the main loop a moment to drain the channel.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    manager.close().await;
}

#[tokio::test]
async fn get_torrent_returns_none_for_unknown_infohash() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());
    let backend = Arc::new(RecordingBackend::new());
    let manager = TorrentManager::new(config, backend).await.unwrap();

    let unknown = Infohash::from_bytes([0xffu8; 20]);
    assert!(manager.get_torrent(unknown).await.is_none());

    manager.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_rejects_further_updates() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());
    let backend = Arc::new(RecordingBackend::new());
    let manager = TorrentManager::new(config, backend).await.unwrap();

    manager.close().await;
    manager.close().await; // must not panic or hang

    let infohash = Infohash::from_bytes([0x11u8; 20]);
    let err = manager
        .update_torrent(FlowControlMsg {
            infohash,
            bytes_requested: 1024,
            is_create: true,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, torrentvault::ManagerError::ManagerClosed));
}

#[tokio::test]
async fn admitted_torrent_starts_in_pending_index() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());
    let backend = Arc::new(RecordingBackend::new());
    let manager = TorrentManager::new(config, backend).await.unwrap();

    let infohash = Infohash::from_bytes([0x33u8; 20]);
    manager.add_infohash(infohash, 1024 * 1024).await.unwrap();

    let snapshot = manager.get_torrent(infohash).await.unwrap();
    assert_eq!(snapshot.status, torrentvault::torrent::TorrentStatus::Pending);

    manager.close().await;
}
