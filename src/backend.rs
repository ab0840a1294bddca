//! The seam between the manager's state machine and the underlying
//! BitTorrent engine.
//!
//! The manager drives five states, byte accounting and piece-window
//! intent purely against this trait; the production implementation
//! wraps [`librqbit::Session`], and tests drive an in-memory double
//! instead of a live swarm.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::infohash::Infohash;

/// Opaque handle to an engine-managed torrent. Carries enough to let
/// the manager re-identify the torrent across backend calls without
/// depending on any concrete engine type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub u64);

/// Snapshot of engine-observed progress for one torrent.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendStats {
    /// Total length of the torrent's concatenated files, in bytes.
    /// `None` until metainfo has been resolved.
    pub length: Option<u64>,
    /// Number of pieces, once metainfo is known.
    pub piece_count: Option<u32>,
    pub bytes_completed: u64,
    pub bytes_missing: u64,
}

impl BackendStats {
    pub fn finished(&self) -> bool {
        self.bytes_missing == 0 && self.bytes_completed > 0
    }
}

/// Where and how to add a torrent to the engine.
pub enum AddSpec<'a> {
    /// A parsed `.torrent` file on disk.
    File {
        torrent_path: &'a Path,
        storage_root: &'a Path,
    },
    /// Infohash-only, magnet-style: no metainfo yet, trackers supplied
    /// out of band.
    Magnet {
        infohash: Infohash,
        trackers: &'a [String],
        storage_root: &'a Path,
    },
    /// Re-add from metainfo bytes fetched via the boost fetcher, laid
    /// out against an existing storage root so the engine verifies and
    /// resumes from "have" rather than re-downloading.
    Bytes {
        metainfo: &'a [u8],
        storage_root: &'a Path,
    },
}

#[async_trait]
pub trait TorrentBackend: Send + Sync {
    /// Add or re-attach a torrent. Idempotent: adding an infohash the
    /// engine already manages returns the existing handle.
    async fn add(&self, spec: AddSpec<'_>) -> Result<BackendHandle>;

    /// Bencoded metainfo bytes, once the engine has resolved them from
    /// the swarm or from a prior `.torrent` load. `None` while pending.
    async fn metainfo(&self, handle: BackendHandle) -> Option<Vec<u8>>;

    async fn stats(&self, handle: BackendHandle) -> BackendStats;

    /// Request that the engine focus on pieces `[start, start+count)`.
    /// Engines whose stable API cannot express an exact range (a
    /// coarse pause/resume toggle, say) should apply the closest
    /// approximation and log at `debug!` rather than silently no-op.
    async fn set_piece_window(&self, handle: BackendHandle, start: u32, count: u32) -> Result<()>;

    async fn set_max_conns(&self, handle: BackendHandle, conns: u32) -> Result<()>;

    /// Add `trackers` to an already-managed torrent. Called once, on
    /// the pending→active transition, with the manager's configured
    /// `DefaultTrackers`.
    async fn set_trackers(&self, handle: BackendHandle, trackers: &[String]) -> Result<()>;

    async fn pause(&self, handle: BackendHandle) -> Result<()>;

    async fn resume(&self, handle: BackendHandle) -> Result<()>;

    /// Drop the engine's tracking of `handle` and re-add it from
    /// `spec`, preserving the on-disk storage root so already-complete
    /// pieces are recognized as "have" on the next check.
    async fn readd(&self, handle: BackendHandle, spec: AddSpec<'_>) -> Result<BackendHandle>;

    /// Best-effort root the engine is storing `handle`'s data under.
    async fn storage_root(&self, handle: BackendHandle) -> Option<PathBuf>;
}
