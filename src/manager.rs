//! The torrent manager: admission, the four cooperating loops (main,
//! pending, active, seeding), flow control, boost triggering,
//! completion detection, and weighted seed rotation.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::backend::{AddSpec, BackendHandle, TorrentBackend};
use crate::badfiles;
use crate::boost::BoostFetcher;
use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::infohash::Infohash;
use crate::metainfo::Metainfo;
use crate::slot::derive_slot;
use crate::torrent::{self, Torrent, TorrentStatus};

const UPDATE_TORRENT_CHAN_BUFFER: usize = 256;
const TORRENT_CHAN_SIZE: usize = 1024;
/// Soft cap on how long a torrent may sit in Pending without metainfo
/// and without a boost attempt yet qualifying, before we stop
/// incrementing its stall counter noisily in the logs.
const PENDING_STALL_LOG_CAP: u32 = 600;

/// Fire-and-forget flow-control request from an external caller.
#[derive(Debug, Clone)]
pub struct FlowControlMsg {
    pub infohash: Infohash,
    pub bytes_requested: u64,
    pub is_create: bool,
}

/// Read-only copy of a torrent's externally-visible state, returned by
/// [`TorrentManager::get_torrent`].
#[derive(Debug, Clone)]
pub struct TorrentSnapshot {
    pub infohash: Infohash,
    pub filepath: PathBuf,
    pub status: TorrentStatus,
    pub bytes_requested: u64,
    pub bytes_limitation: u64,
    pub bytes_completed: u64,
    pub bytes_missing: u64,
    pub cited: u64,
    pub weight: u32,
}

impl From<&Torrent> for TorrentSnapshot {
    fn from(t: &Torrent) -> Self {
        Self {
            infohash: t.infohash,
            filepath: t.filepath.clone(),
            status: t.status,
            bytes_requested: t.bytes_requested,
            bytes_limitation: t.bytes_limitation,
            bytes_completed: t.bytes_completed,
            bytes_missing: t.bytes_missing,
            cited: t.cited,
            weight: t.weight,
        }
    }
}

/// Aggregate counts logged every `loops` active-loop ticks, mirroring
/// the original implementation's periodic status line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerSnapshot {
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub seeding_in_queue: usize,
    pub seeding: usize,
    pub total_bytes_completed: u64,
    pub bytes_completed_since_last_snapshot: u64,
}

struct Shared {
    torrents: HashMap<Infohash, Torrent>,
    pending: HashSet<Infohash>,
    active: HashSet<Infohash>,
    seeding: HashSet<Infohash>,
    quotas: HashMap<Infohash, u64>,
    trackers: Vec<String>,
    max_cited: u64,
}

impl Shared {
    fn new(trackers: Vec<String>) -> Self {
        Self {
            torrents: HashMap::new(),
            pending: HashSet::new(),
            active: HashSet::new(),
            seeding: HashSet::new(),
            quotas: HashMap::new(),
            trackers,
            max_cited: 1,
        }
    }
}

/// Owns the underlying torrent client, the shared index, and the four
/// long-lived loop tasks.
pub struct TorrentManager {
    shared: Arc<RwLock<Shared>>,
    backend: Arc<dyn TorrentBackend>,
    boost: Arc<BoostFetcher>,
    config: ManagerConfig,
    data_dir: PathBuf,
    slot: u32,
    update_tx: mpsc::Sender<FlowControlMsg>,
    pending_tx: mpsc::Sender<Infohash>,
    active_tx: mpsc::Sender<Infohash>,
    seeding_tx: mpsc::Sender<Infohash>,
    closing_tx: watch::Sender<bool>,
    closed: AtomicBool,
    loop_handles: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl TorrentManager {
    pub async fn new(config: ManagerConfig, backend: Arc<dyn TorrentBackend>) -> Result<Arc<Self>> {
        let data_dir = config.storage.data_dir.clone();
        std::fs::create_dir_all(&data_dir).map_err(ManagerError::TransientIo)?;
        std::fs::create_dir_all(data_dir.join("tmp")).map_err(ManagerError::TransientIo)?;

        let boost = Arc::new(BoostFetcher::new(
            config.boost.nodes.clone(),
            config.boost.timeout(),
        )?);

        let slot = derive_slot(&data_dir, config.limits.bucket);

        let shared = Arc::new(RwLock::new(Shared::new(config.network.default_trackers.clone())));

        let (update_tx, update_rx) = mpsc::channel(UPDATE_TORRENT_CHAN_BUFFER);
        let (pending_tx, pending_rx) = mpsc::channel(TORRENT_CHAN_SIZE);
        let (active_tx, active_rx) = mpsc::channel(TORRENT_CHAN_SIZE);
        let (seeding_tx, seeding_rx) = mpsc::channel(TORRENT_CHAN_SIZE);
        let (closing_tx, closing_rx) = watch::channel(false);

        let manager = Arc::new(Self {
            shared,
            backend,
            boost,
            config,
            data_dir,
            slot,
            update_tx,
            pending_tx,
            active_tx,
            seeding_tx,
            closing_tx,
            closed: AtomicBool::new(false),
            loop_handles: Mutex::new(None),
        });

        let main_handle = tokio::spawn(Self::main_loop(manager.clone(), update_rx, closing_rx.clone()));
        let pending_handle = tokio::spawn(Self::pending_loop(manager.clone(), pending_rx, closing_rx.clone()));
        let active_handle = tokio::spawn(Self::active_loop(manager.clone(), active_rx, closing_rx.clone()));
        let seeding_handle = tokio::spawn(Self::seeding_loop(manager.clone(), seeding_rx, closing_rx));

        *manager.loop_handles.lock().await = Some(vec![main_handle, pending_handle, active_handle, seeding_handle]);

        Ok(manager)
    }

    fn block(&self) -> u64 {
        self.config.limits.per_upload_bytes
    }

    fn tmp_root(&self, infohash: &Infohash) -> PathBuf {
        self.data_dir.join("tmp").join(infohash.to_hex())
    }

    fn data_root(&self, infohash: &Infohash) -> PathBuf {
        self.data_dir.join(infohash.to_hex())
    }

    // ---- inbound API ----------------------------------------------

    /// Fire-and-forget flow-control message. Returns `ManagerClosed`
    /// immediately once `close` has been called; otherwise enqueues
    /// for the main loop and never blocks the caller for long.
    pub async fn update_torrent(&self, msg: FlowControlMsg) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ManagerError::ManagerClosed);
        }
        self.update_tx
            .send(msg)
            .await
            .map_err(|_| ManagerError::ManagerClosed)
    }

    pub async fn get_torrent(&self, infohash: Infohash) -> Option<TorrentSnapshot> {
        let shared = self.shared.read().await;
        shared.torrents.get(&infohash).map(TorrentSnapshot::from)
    }

    /// Idempotent shutdown: stop accepting intake, signal all four
    /// loops, and wait for them to exit before returning.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.closing_tx.send(true);
        let handles = self.loop_handles.lock().await.take();
        if let Some(handles) = handles {
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    // ---- admission ---------------------------------------------------

    pub async fn add_torrent_file(&self, path: &std::path::Path, bytes_requested: u64) -> Result<Infohash> {
        let bytes = tokio::fs::read(path).await.map_err(ManagerError::TransientIo)?;
        let metainfo = Metainfo::parse(&bytes)?;
        let infohash = metainfo.infohash()?;

        if badfiles::is_bad(&infohash.to_hex()) {
            return Err(ManagerError::Backend(format!(
                "infohash {} is blacklisted: {}",
                infohash,
                badfiles::reason(&infohash.to_hex()).unwrap_or_default()
            )));
        }

        {
            let shared = self.shared.read().await;
            if shared.torrents.contains_key(&infohash) {
                return Ok(infohash);
            }
        }

        let data_root = self.data_root(&infohash);
        let tmp_root = self.tmp_root(&infohash);

        let storage_root = if data_root.exists() && crate::verify::verify_directory(&metainfo, &data_root).is_ok() {
            data_root.clone()
        } else {
            tokio::fs::create_dir_all(&tmp_root)
                .await
                .map_err(ManagerError::TransientIo)?;
            tmp_root.clone()
        };

        let backend_handle = self
            .backend
            .add(AddSpec::File {
                torrent_path: path,
                storage_root: &storage_root,
            })
            .await?;

        self.register_new_torrent(infohash, backend_handle, storage_root, bytes_requested)
            .await;
        Ok(infohash)
    }

    pub async fn add_infohash(&self, infohash: Infohash, bytes_requested: u64) -> Result<Infohash> {
        if badfiles::is_bad(&infohash.to_hex()) {
            return Err(ManagerError::Backend(format!(
                "infohash {} is blacklisted",
                infohash
            )));
        }

        {
            let shared = self.shared.read().await;
            if shared.torrents.contains_key(&infohash) {
                return Ok(infohash);
            }
        }

        let data_torrent_file = self.data_root(&infohash).join("torrent");
        let tmp_torrent_file = self.tmp_root(&infohash).join("torrent");
        if data_torrent_file.exists() {
            return self.add_torrent_file(&data_torrent_file, bytes_requested).await;
        }
        if tmp_torrent_file.exists() {
            return self.add_torrent_file(&tmp_torrent_file, bytes_requested).await;
        }

        let tmp_root = self.tmp_root(&infohash);
        tokio::fs::create_dir_all(&tmp_root)
            .await
            .map_err(ManagerError::TransientIo)?;

        let trackers = self.shared.read().await.trackers.clone();
        let backend_handle = self
            .backend
            .add(AddSpec::Magnet {
                infohash,
                trackers: &trackers,
                storage_root: &tmp_root,
            })
            .await?;

        self.register_new_torrent(infohash, backend_handle, tmp_root, bytes_requested)
            .await;
        Ok(infohash)
    }

    async fn register_new_torrent(
        &self,
        infohash: Infohash,
        backend_handle: BackendHandle,
        filepath: PathBuf,
        bytes_requested: u64,
    ) {
        let mut torrent = Torrent::new(
            infohash,
            backend_handle,
            filepath,
            self.config.limits.min_conns,
            self.config.limits.max_conns,
        );
        torrent.bytes_requested = bytes_requested;
        torrent.bytes_limitation = torrent::bytes_limitation(bytes_requested, self.block());

        {
            let mut shared = self.shared.write().await;
            shared.quotas.insert(infohash, bytes_requested);
            shared.pending.insert(infohash);
            shared.torrents.insert(infohash, torrent);
        }

        if self.pending_tx.send(infohash).await.is_err() {
            tracing::warn!(%infohash, "pending channel closed while registering torrent");
        }
    }

    async fn raise_quota(&self, infohash: Infohash, bytes_requested: u64) {
        let mut shared = self.shared.write().await;
        let current = shared.quotas.get(&infohash).copied().unwrap_or(0);
        if bytes_requested > current {
            shared.quotas.insert(infohash, bytes_requested);
        }
    }

    // ---- main loop -----------------------------------------------------

    async fn main_loop(
        manager: Arc<Self>,
        mut update_rx: mpsc::Receiver<FlowControlMsg>,
        mut closing_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = closing_rx.changed() => {
                    if *closing_rx.borrow() {
                        break;
                    }
                }
                msg = update_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if msg.is_create {
                        let mut admitted = false;
                        for attempt in 0..10 {
                            match manager.add_infohash(msg.infohash, msg.bytes_requested).await {
                                Ok(_) => {
                                    admitted = true;
                                    break;
                                }
                                Err(e) => {
                                    tracing::warn!(infohash = %msg.infohash, attempt, error = %e, "admission attempt failed");
                                }
                            }
                        }
                        if admitted {
                            manager.raise_quota(msg.infohash, msg.bytes_requested).await;
                        } else {
                            tracing::error!(infohash = %msg.infohash, "admission exhausted all retries");
                        }
                    } else {
                        manager.raise_quota(msg.infohash, msg.bytes_requested).await;
                    }
                }
            }
        }
        tracing::info!("main loop exiting");
    }

    // ---- pending loop ----------------------------------------------------

    async fn pending_loop(
        manager: Arc<Self>,
        mut pending_rx: mpsc::Receiver<Infohash>,
        mut closing_rx: watch::Receiver<bool>,
    ) {
        let mut local: HashSet<Infohash> = HashSet::new();
        let mut interval = tokio::time::interval(manager.config.timing.query_time_interval());
        let stall_threshold = (manager.config.timing.torrent_waiting_secs
            / manager.config.timing.query_time_interval_secs.max(1)) as u32;

        loop {
            tokio::select! {
                _ = closing_rx.changed() => {
                    if *closing_rx.borrow() {
                        break;
                    }
                }
                Some(infohash) = pending_rx.recv() => {
                    local.insert(infohash);
                }
                _ = interval.tick() => {
                    while let Ok(infohash) = pending_rx.try_recv() {
                        local.insert(infohash);
                    }
                    manager.pending_tick(&mut local, stall_threshold).await;
                }
            }
        }
        tracing::info!("pending loop exiting");
    }

    async fn pending_tick(&self, local: &mut HashSet<Infohash>, stall_threshold: u32) {
        let snapshot: Vec<Infohash> = local.iter().copied().collect();

        for infohash in snapshot {
            if badfiles::is_bad(&infohash.to_hex()) {
                local.remove(&infohash);
                let mut shared = self.shared.write().await;
                shared.pending.remove(&infohash);
                continue;
            }

            let backend_handle = {
                let shared = self.shared.read().await;
                match shared.torrents.get(&infohash) {
                    Some(t) => t.backend,
                    None => {
                        local.remove(&infohash);
                        continue;
                    }
                }
            };

            if let Some(metainfo_bytes) = self.backend.metainfo(backend_handle).await {
                if self.promote_to_active(infohash, &metainfo_bytes).await.is_ok() {
                    local.remove(&infohash);
                    continue;
                }
            }

            let (is_boosting, loop_ticks) = {
                let shared = self.shared.read().await;
                match shared.torrents.get(&infohash) {
                    Some(t) => (t.is_boosting, t.loop_ticks),
                    None => continue,
                }
            };

            if loop_ticks > stall_threshold && !is_boosting {
                self.spawn_pending_boost(infohash).await;
            } else {
                let mut shared = self.shared.write().await;
                if let Some(t) = shared.torrents.get_mut(&infohash) {
                    if t.loop_ticks <= PENDING_STALL_LOG_CAP {
                        t.loop_ticks += 1;
                    }
                }
            }
        }
    }

    async fn promote_to_active(&self, infohash: Infohash, metainfo_bytes: &[u8]) -> Result<()> {
        // Parsed only to reject corrupt metainfo before promoting.
        let _metainfo = Metainfo::parse(metainfo_bytes)?;

        let mut shared = self.shared.write().await;

        if shared.active.len() >= self.config.limits.max_active as usize {
            // At capacity; stay pending and retry on a later tick.
            return Err(ManagerError::MetainfoUnavailable);
        }

        let Some(torrent) = shared.torrents.get_mut(&infohash) else {
            return Ok(());
        };

        let torrent_file = torrent.filepath.join("torrent");
        let first_time = !torrent_file.exists();
        if first_time {
            let tmp_file = torrent_file.with_extension("tmp");
            std::fs::write(&tmp_file, metainfo_bytes).map_err(ManagerError::TransientIo)?;
            std::fs::rename(&tmp_file, &torrent_file).map_err(ManagerError::TransientIo)?;
        }

        torrent.start = Instant::now();
        torrent.status = TorrentStatus::Running;
        torrent.reset_loop();
        let backend_handle = torrent.backend;

        shared.pending.remove(&infohash);
        shared.active.insert(infohash);
        let trackers = shared.trackers.clone();
        drop(shared);

        if first_time {
            if let Err(e) = self.backend.set_trackers(backend_handle, &trackers).await {
                tracing::warn!(%infohash, error = %e, "failed to add default trackers on promotion");
            }
        }

        if self.active_tx.send(infohash).await.is_err() {
            tracing::warn!(%infohash, "active channel closed while promoting torrent");
        }
        Ok(())
    }

    async fn spawn_pending_boost(&self, infohash: Infohash) {
        {
            let mut shared = self.shared.write().await;
            if let Some(t) = shared.torrents.get_mut(&infohash) {
                if t.is_boosting {
                    return;
                }
                t.is_boosting = true;
            }
        }

        let shared = self.shared.clone();
        let backend = self.backend.clone();
        let boost = self.boost.clone();
        let update_tx = self.update_tx.clone();

        tokio::spawn(async move {
            let (bytes_requested, storage_root) = {
                let guard = shared.read().await;
                match guard.torrents.get(&infohash) {
                    Some(t) => (t.bytes_requested, t.filepath.clone()),
                    None => return,
                }
            };

            match boost.fetch_torrent(infohash).await {
                Ok(metainfo_bytes) => {
                    let spec = AddSpec::Bytes {
                        metainfo: &metainfo_bytes,
                        storage_root: &storage_root,
                    };
                    let current_handle = {
                        let guard = shared.read().await;
                        guard.torrents.get(&infohash).map(|t| t.backend)
                    };
                    if let Some(handle) = current_handle {
                        match backend.readd(handle, spec).await {
                            Ok(new_handle) => {
                                let mut guard = shared.write().await;
                                if let Some(t) = guard.torrents.get_mut(&infohash) {
                                    t.backend = new_handle;
                                }
                                drop(guard);
                                let _ = update_tx
                                    .send(FlowControlMsg {
                                        infohash,
                                        bytes_requested,
                                        is_create: true,
                                    })
                                    .await;
                            }
                            Err(e) => {
                                tracing::warn!(%infohash, error = %e, "boost re-add failed");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%infohash, error = %e, "boost fetch failed, remaining pending");
                }
            }

            let mut guard = shared.write().await;
            if let Some(t) = guard.torrents.get_mut(&infohash) {
                t.is_boosting = false;
            }
        });
    }

    // ---- active loop -----------------------------------------------------

    async fn active_loop(
        manager: Arc<Self>,
        mut active_rx: mpsc::Receiver<Infohash>,
        mut closing_rx: watch::Receiver<bool>,
    ) {
        let mut local: HashSet<Infohash> = HashSet::new();
        let mut interval = tokio::time::interval(manager.config.timing.query_time_interval());
        let download_stall_threshold = (manager.config.timing.download_waiting_secs
            / manager.config.timing.query_time_interval_secs.max(1)) as u32;
        let mut ticks_since_snapshot = 0u32;
        let mut last_snapshot_completed = 0u64;

        loop {
            tokio::select! {
                _ = closing_rx.changed() => {
                    if *closing_rx.borrow() {
                        break;
                    }
                }
                Some(infohash) = active_rx.recv() => {
                    local.insert(infohash);
                }
                _ = interval.tick() => {
                    while let Ok(infohash) = active_rx.try_recv() {
                        local.insert(infohash);
                    }

                    manager.refresh_weights().await;
                    manager.active_tick(&mut local, download_stall_threshold).await;

                    ticks_since_snapshot += 1;
                    if ticks_since_snapshot >= manager.config.timing.loops {
                        ticks_since_snapshot = 0;
                        let snapshot = manager.snapshot(last_snapshot_completed).await;
                        last_snapshot_completed = snapshot.total_bytes_completed;
                        tracing::info!(
                            pending = snapshot.pending,
                            running = snapshot.running,
                            paused = snapshot.paused,
                            seeding = snapshot.seeding,
                            seeding_in_queue = snapshot.seeding_in_queue,
                            total_bytes_completed = snapshot.total_bytes_completed,
                            delta = snapshot.bytes_completed_since_last_snapshot,
                            "torrent manager status"
                        );
                    }
                }
            }
        }
        tracing::info!("active loop exiting");
    }

    async fn refresh_weights(&self) {
        let mut shared = self.shared.write().await;
        let max_cited = shared.max_cited;
        for torrent in shared.torrents.values_mut() {
            torrent.weight = torrent::weight(torrent.cited, max_cited);
        }
    }

    async fn active_tick(&self, local: &mut HashSet<Infohash>, download_stall_threshold: u32) {
        let block = self.block();
        let full_seed = self.config.limits.full_seed;
        let snapshot: Vec<Infohash> = local.iter().copied().collect();

        for infohash in snapshot {
            if badfiles::is_bad(&infohash.to_hex()) {
                local.remove(&infohash);
                let mut shared = self.shared.write().await;
                shared.active.remove(&infohash);
                continue;
            }

            let backend_handle = {
                let shared = self.shared.read().await;
                match shared.torrents.get(&infohash) {
                    Some(t) => t.backend,
                    None => {
                        local.remove(&infohash);
                        continue;
                    }
                }
            };

            let stats = self.backend.stats(backend_handle).await;
            let Some(length) = stats.length else { continue };

            let quota = {
                let shared = self.shared.read().await;
                shared.quotas.get(&infohash).copied().unwrap_or(0)
            };

            {
                let mut shared = self.shared.write().await;
                let Some(torrent) = shared.torrents.get_mut(&infohash) else {
                    continue;
                };

                let r = torrent.bytes_requested;
                let c = stats.bytes_completed;

                if quota >= length {
                    torrent.bytes_requested = quota;
                    torrent.fast = true;
                } else if r <= c {
                    let cap = if full_seed { length } else { quota };
                    torrent.bytes_requested = cap.min(r + block);
                    torrent.fast = false;
                }
                // else: quota < length and r > c -> unchanged.

                torrent.bytes_limitation = torrent::bytes_limitation(torrent.bytes_requested, block);
                torrent.bytes_completed = stats.bytes_completed;
                torrent.bytes_missing = stats.bytes_missing;
            }

            if stats.finished() {
                if self.seal_completed(infohash).await {
                    if self.seeding_tx.try_send(infohash).is_ok() {
                        local.remove(&infohash);
                        let mut shared = self.shared.write().await;
                        shared.active.remove(&infohash);
                        continue;
                    }
                    tracing::debug!(%infohash, "seeding channel full, retrying next tick");
                }
            }

            let (completed, limitation, requested, loop_ticks, is_boosting) = {
                let shared = self.shared.read().await;
                let t = &shared.torrents[&infohash];
                (t.bytes_completed, t.bytes_limitation, t.bytes_requested, t.loop_ticks, t.is_boosting)
            };

            if completed >= limitation {
                let mut shared = self.shared.write().await;
                if let Some(t) = shared.torrents.get_mut(&infohash) {
                    if t.status != TorrentStatus::Paused {
                        t.status = TorrentStatus::Paused;
                        t.reset_loop();
                    }
                    t.max_pieces = 0;
                    t.current_conns = t.min_conns;
                }
                let _ = self.backend.set_piece_window(backend_handle, 0, 0).await;
                let _ = self.backend.set_max_conns(backend_handle, self.config.limits.min_conns).await;
                continue;
            }

            let requests_whole_torrent = requested >= stats.bytes_completed + stats.bytes_missing;
            let under_half = stats.bytes_completed < (stats.bytes_completed + stats.bytes_missing) / 2;
            if requests_whole_torrent && loop_ticks > download_stall_threshold && under_half && !is_boosting {
                self.spawn_active_boost(infohash).await;
                continue;
            }

            if !is_boosting {
                self.run_piece_window(infohash, backend_handle, length, &stats).await;
            }

            let mut shared = self.shared.write().await;
            if let Some(t) = shared.torrents.get_mut(&infohash) {
                t.loop_ticks += 1;
            }
        }
    }

    async fn seal_completed(&self, infohash: Infohash) -> bool {
        let (tmp_root, already_data_root) = {
            let shared = self.shared.read().await;
            let Some(t) = shared.torrents.get(&infohash) else {
                return false;
            };
            (t.filepath.clone(), t.filepath == self.data_root(&infohash))
        };

        if already_data_root {
            return true;
        }

        let data_root = self.data_root(&infohash);
        let result = if data_root.exists() {
            Ok(())
        } else {
            #[cfg(unix)]
            {
                std::os::unix::fs::symlink(&tmp_root, &data_root)
            }
            #[cfg(not(unix))]
            {
                std::fs::rename(&tmp_root, &data_root)
            }
        };

        match result {
            Ok(()) => {
                let mut shared = self.shared.write().await;
                if let Some(t) = shared.torrents.get_mut(&infohash) {
                    t.filepath = data_root;
                }
                true
            }
            Err(e) => {
                tracing::warn!(%infohash, error = %e, "failed to seal completed torrent directory");
                false
            }
        }
    }

    async fn run_piece_window(
        &self,
        infohash: Infohash,
        backend_handle: BackendHandle,
        length: u64,
        stats: &crate::backend::BackendStats,
    ) {
        let piece_count = stats.piece_count.unwrap_or(0);
        if piece_count == 0 {
            return;
        }

        let (bytes_requested, current_max_pieces, status, fast, min_conns, max_conns) = {
            let shared = self.shared.read().await;
            let t = &shared.torrents[&infohash];
            (t.bytes_requested, t.max_pieces, t.status, t.fast, t.min_conns, t.max_conns)
        };

        let window = torrent::piece_window(bytes_requested, length, piece_count, self.config.limits.bucket, self.slot);

        if window.count > current_max_pieces || status != TorrentStatus::Running {
            if self
                .backend
                .set_piece_window(backend_handle, window.start, window.count)
                .await
                .is_ok()
            {
                let mut shared = self.shared.write().await;
                if let Some(t) = shared.torrents.get_mut(&infohash) {
                    t.status = TorrentStatus::Running;
                    t.max_pieces = window.count;
                }
            }
        }

        let target_conns = if fast { max_conns } else { min_conns };
        if self.backend.set_max_conns(backend_handle, target_conns).await.is_ok() {
            let mut shared = self.shared.write().await;
            if let Some(t) = shared.torrents.get_mut(&infohash) {
                t.current_conns = target_conns;
            }
        }
    }

    async fn spawn_active_boost(&self, infohash: Infohash) {
        {
            let mut shared = self.shared.write().await;
            if let Some(t) = shared.torrents.get_mut(&infohash) {
                if t.is_boosting {
                    return;
                }
                t.is_boosting = true;
            }
        }

        let shared = self.shared.clone();
        let backend = self.backend.clone();
        let boost = self.boost.clone();

        tokio::spawn(async move {
            let (storage_root, handle) = {
                let guard = shared.read().await;
                match guard.torrents.get(&infohash) {
                    Some(t) => (t.filepath.clone(), t.backend),
                    None => return,
                }
            };

            // Per-file selective boosting would require file-level
            // completion stats the backend trait does not expose;
            // boost at torrent granularity instead.
            match boost.fetch_torrent(infohash).await {
                Ok(metainfo_bytes) => {
                    let spec = AddSpec::Bytes {
                        metainfo: &metainfo_bytes,
                        storage_root: &storage_root,
                    };
                    match backend.readd(handle, spec).await {
                        Ok(new_handle) => {
                            let mut guard = shared.write().await;
                            if let Some(t) = guard.torrents.get_mut(&infohash) {
                                t.backend = new_handle;
                                t.reset_loop();
                            }
                        }
                        Err(e) => tracing::warn!(%infohash, error = %e, "active boost re-add failed"),
                    }
                }
                Err(e) => tracing::warn!(%infohash, error = %e, "active boost fetch failed"),
            }

            let mut guard = shared.write().await;
            if let Some(t) = guard.torrents.get_mut(&infohash) {
                t.is_boosting = false;
            }
        });
    }

    async fn snapshot(&self, last_total_completed: u64) -> ManagerSnapshot {
        let shared = self.shared.read().await;
        let mut snap = ManagerSnapshot::default();
        snap.pending = shared.pending.len();
        for infohash in &shared.active {
            match shared.torrents.get(infohash).map(|t| t.status) {
                Some(TorrentStatus::Running) => snap.running += 1,
                Some(TorrentStatus::Paused) => snap.paused += 1,
                _ => {}
            }
        }
        for infohash in &shared.seeding {
            match shared.torrents.get(infohash).map(|t| t.status) {
                Some(TorrentStatus::Seeding) => snap.seeding += 1,
                Some(TorrentStatus::SeedingInQueue) => snap.seeding_in_queue += 1,
                _ => {}
            }
        }
        snap.total_bytes_completed = shared.torrents.values().map(|t| t.bytes_completed).sum();
        snap.bytes_completed_since_last_snapshot = snap.total_bytes_completed.saturating_sub(last_total_completed);
        snap
    }

    // ---- seeding loop ----------------------------------------------------

    async fn seeding_loop(
        manager: Arc<Self>,
        mut seeding_rx: mpsc::Receiver<Infohash>,
        mut closing_rx: watch::Receiver<bool>,
    ) {
        let mut local: HashSet<Infohash> = HashSet::new();
        let mut interval = tokio::time::interval(manager.config.timing.query_time_interval());

        loop {
            tokio::select! {
                _ = closing_rx.changed() => {
                    if *closing_rx.borrow() {
                        break;
                    }
                }
                Some(infohash) = seeding_rx.recv() => {
                    manager.seed(infohash).await;
                    local.insert(infohash);
                    manager.maybe_rotate_seeds(&local).await;
                }
                _ = interval.tick() => {
                    while let Ok(infohash) = seeding_rx.try_recv() {
                        manager.seed(infohash).await;
                        local.insert(infohash);
                    }
                    manager.maybe_rotate_seeds(&local).await;
                }
            }
        }
        tracing::info!("seeding loop exiting");
    }

    async fn seed(&self, infohash: Infohash) {
        let mut shared = self.shared.write().await;
        shared.seeding.insert(infohash);
        let Some(t) = shared.torrents.get_mut(&infohash) else {
            return;
        };
        let target = t.max_conns / 2;
        t.current_conns = target.max(t.min_conns);
        t.status = TorrentStatus::Seeding;
        t.reset_loop();
        let handle = t.backend;
        let conns = t.current_conns;
        drop(shared);
        let _ = self.backend.set_max_conns(handle, conns).await;
    }

    async fn seed_in_queue(&self, infohash: Infohash) {
        let mut shared = self.shared.write().await;
        let Some(t) = shared.torrents.get_mut(&infohash) else {
            return;
        };
        t.current_conns = t.min_conns;
        t.status = TorrentStatus::SeedingInQueue;
        let handle = t.backend;
        let conns = t.current_conns;
        drop(shared);
        let _ = self.backend.set_max_conns(handle, conns).await;
    }

    async fn maybe_rotate_seeds(&self, local: &HashSet<Infohash>) {
        let max_seed_task = self.config.limits.max_seeding as usize;
        if local.len() <= max_seed_task {
            return;
        }

        let seed_interval_ticks = (self.config.timing.seed_interval_secs
            / self.config.timing.query_time_interval_secs.max(1)) as u32;

        let (total_weight, already_seeding) = {
            let shared = self.shared.read().await;
            let mut w = 0u64;
            let mut seeding_now = 0usize;
            for infohash in local {
                if let Some(t) = shared.torrents.get(infohash) {
                    if t.loop_ticks == 0 {
                        w += t.weight as u64;
                    }
                    if t.status == TorrentStatus::Seeding && t.loop_ticks > 0 {
                        seeding_now += 1;
                    }
                }
            }
            (w, seeding_now)
        };

        let n = (max_seed_task.saturating_sub(already_seeding)) as u64;

        for infohash in local.iter().copied().collect::<Vec<_>>() {
            let ready = {
                let mut shared = self.shared.write().await;
                let Some(t) = shared.torrents.get_mut(&infohash) else {
                    continue;
                };
                if t.loop_ticks > 0 {
                    t.loop_ticks -= 1;
                    false
                } else {
                    t.loop_ticks = seed_interval_ticks.max(1);
                    true
                }
            };

            if !ready {
                continue;
            }

            let weight = {
                let shared = self.shared.read().await;
                shared.torrents.get(&infohash).map(|t| t.weight as u64).unwrap_or(1)
            };

            let threshold = if total_weight == 0 {
                0.0
            } else {
                (weight * n) as f64 / total_weight as f64
            };
            let roll: f64 = rand::thread_rng().gen();

            if roll < threshold {
                self.seed(infohash).await;
            } else {
                self.seed_in_queue(infohash).await;
            }
        }
    }

    /// Record a consumer open against `infohash`, bumping `cited` and
    /// the process-wide `max_cited` high-water mark.
    pub async fn cite(&self, infohash: Infohash) {
        let mut shared = self.shared.write().await;
        let max_cited = shared.max_cited;
        let new_cited = shared.torrents.get_mut(&infohash).map(|t| {
            t.cited += 1;
            t.cited
        });
        if let Some(new_cited) = new_cited {
            if new_cited > max_cited {
                shared.max_cited = new_cited;
            }
        }
    }
}
