//! [`TorrentBackend`] implementation backed by a live [`librqbit::Session`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::dht::PersistentDhtConfig;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session, SessionOptions,
};
use tokio::sync::RwLock;

use crate::backend::{AddSpec, BackendHandle, BackendStats, TorrentBackend};
use crate::config::NetworkConfig;
use crate::error::{ManagerError, Result};
use crate::metainfo::Metainfo;

/// Tracking kept alongside each engine-managed torrent: the engine
/// handle itself and the storage root it was added against, since
/// librqbit does not hand the latter back on demand.
struct Entry {
    handle: Arc<ManagedTorrent>,
    storage_root: PathBuf,
}

pub struct LibrqbitBackend {
    session: Arc<Session>,
    entries: RwLock<HashMap<BackendHandle, Entry>>,
}

impl LibrqbitBackend {
    pub async fn new(data_dir: &std::path::Path, network: &NetworkConfig) -> Result<Self> {
        let opts = SessionOptions {
            disable_dht: network.disable_dht,
            disable_dht_persistence: network.disable_dht,
            dht_config: if network.disable_dht {
                None
            } else {
                Some(PersistentDhtConfig {
                    config_filename: Some(data_dir.join("dht.json")),
                    ..Default::default()
                })
            },
            listen_port_range: Some(network.port..network.port + 1),
            fastresume: true,
            ..Default::default()
        };

        let session = Session::new_with_opts(data_dir.to_path_buf(), opts)
            .await
            .map_err(|e| ManagerError::Backend(format!("session init failed: {e}")))?;

        tracing::info!(data_dir = %data_dir.display(), port = network.port, "torrent engine session started");

        Ok(Self {
            session,
            entries: RwLock::new(HashMap::new()),
        })
    }

    fn handle_for(id: usize) -> BackendHandle {
        BackendHandle(id as u64)
    }

    async fn record(&self, backend_handle: BackendHandle, handle: Arc<ManagedTorrent>, storage_root: PathBuf) {
        self.entries
            .write()
            .await
            .insert(backend_handle, Entry { handle, storage_root });
    }

    async fn engine_handle(&self, handle: BackendHandle) -> Option<Arc<ManagedTorrent>> {
        self.entries.read().await.get(&handle).map(|e| e.handle.clone())
    }
}

#[async_trait]
impl TorrentBackend for LibrqbitBackend {
    async fn add(&self, spec: AddSpec<'_>) -> Result<BackendHandle> {
        let (add_torrent, storage_root, output_folder) = match spec {
            AddSpec::File {
                torrent_path,
                storage_root,
            } => {
                let bytes = tokio::fs::read(torrent_path)
                    .await
                    .map_err(ManagerError::TransientIo)?;
                (AddTorrent::from_bytes(bytes), storage_root.to_path_buf(), storage_root.to_path_buf())
            }
            AddSpec::Magnet {
                infohash,
                trackers: _,
                storage_root,
            } => {
                let magnet = format!("magnet:?xt=urn:btih:{}", infohash.to_hex());
                (AddTorrent::from_url(magnet), storage_root.to_path_buf(), storage_root.to_path_buf())
            }
            AddSpec::Bytes {
                metainfo,
                storage_root,
            } => (
                AddTorrent::from_bytes(metainfo.to_vec()),
                storage_root.to_path_buf(),
                storage_root.to_path_buf(),
            ),
        };

        let opts = AddTorrentOptions {
            output_folder: Some(output_folder.to_string_lossy().into_owned()),
            ..Default::default()
        };

        let response = self
            .session
            .add_torrent(add_torrent, Some(opts))
            .await
            .map_err(|e| ManagerError::Backend(format!("add_torrent failed: {e}")))?;

        match response {
            AddTorrentResponse::AlreadyManaged(id, handle) => {
                let backend_handle = Self::handle_for(id.into());
                self.record(backend_handle, handle, storage_root).await;
                Ok(backend_handle)
            }
            AddTorrentResponse::Added(id, handle) => {
                let backend_handle = Self::handle_for(id.into());
                self.record(backend_handle, handle, storage_root).await;
                Ok(backend_handle)
            }
            AddTorrentResponse::ListOnly(_) => Err(ManagerError::Backend(
                "engine returned list-only response for a download request".into(),
            )),
        }
    }

    async fn metainfo(&self, handle: BackendHandle) -> Option<Vec<u8>> {
        let engine_handle = self.engine_handle(handle).await?;
        engine_handle
            .with_metadata(|meta| meta.torrent_bytes.to_vec())
            .ok()
    }

    async fn stats(&self, handle: BackendHandle) -> BackendStats {
        let Some(engine_handle) = self.engine_handle(handle).await else {
            return BackendStats::default();
        };

        let stats = engine_handle.stats();
        let length = stats.total_bytes;
        let completed = stats.progress_bytes.min(length);

        // The stable stats struct has no piece count; derive it from
        // the torrent's own metainfo bytes instead of re-deriving a
        // parallel notion of "piece" from the engine.
        let piece_count = engine_handle
            .with_metadata(|meta| meta.torrent_bytes.to_vec())
            .ok()
            .and_then(|bytes| Metainfo::parse(&bytes).ok())
            .map(|m| m.piece_count());

        BackendStats {
            length: Some(length),
            piece_count,
            bytes_completed: completed,
            bytes_missing: length.saturating_sub(completed),
        }
    }

    async fn set_piece_window(&self, handle: BackendHandle, start: u32, count: u32) -> Result<()> {
        // librqbit's stable API has no exact piece-range selector; the
        // closest available control is resuming the whole torrent and
        // letting its own rarest-first scheduler run. Record the
        // intent for observability only.
        tracing::debug!(?handle, start, count, "piece window requested (engine applies full-torrent scheduling)");
        self.resume(handle).await
    }

    async fn set_max_conns(&self, handle: BackendHandle, conns: u32) -> Result<()> {
        tracing::debug!(?handle, conns, "connection cap requested (not independently controllable via the stable API)");
        Ok(())
    }

    async fn set_trackers(&self, handle: BackendHandle, trackers: &[String]) -> Result<()> {
        let Some(engine_handle) = self.engine_handle(handle).await else {
            return Ok(());
        };
        for tracker in trackers {
            match tracker.parse() {
                Ok(url) => {
                    engine_handle.add_tracker(url);
                }
                Err(e) => {
                    tracing::warn!(?handle, tracker, error = %e, "skipping malformed default tracker");
                }
            }
        }
        Ok(())
    }

    async fn pause(&self, handle: BackendHandle) -> Result<()> {
        let Some(engine_handle) = self.engine_handle(handle).await else {
            return Ok(());
        };
        self.session
            .pause(&engine_handle)
            .await
            .map_err(|e| ManagerError::Backend(format!("pause failed: {e}")))
    }

    async fn resume(&self, handle: BackendHandle) -> Result<()> {
        let Some(engine_handle) = self.engine_handle(handle).await else {
            return Ok(());
        };
        self.session
            .unpause(&engine_handle)
            .await
            .map_err(|e| ManagerError::Backend(format!("resume failed: {e}")))
    }

    async fn readd(&self, handle: BackendHandle, spec: AddSpec<'_>) -> Result<BackendHandle> {
        if let Some(engine_handle) = self.engine_handle(handle).await {
            let _ = self
                .session
                .delete(TorrentIdOrHash::Id(engine_handle.id()), false)
                .await;
        }
        self.entries.write().await.remove(&handle);
        self.add(spec).await
    }

    async fn storage_root(&self, handle: BackendHandle) -> Option<PathBuf> {
        self.entries.read().await.get(&handle).map(|e| e.storage_root.clone())
    }
}
