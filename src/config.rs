//! Configuration for the torrent storage manager.
//!
//! Loaded with the `config` crate: built-in defaults, overridden by an
//! optional `config.toml` in the current directory, overridden in turn
//! by `TORRENTVAULT__`-prefixed environment variables (double
//! underscore for nesting, e.g. `TORRENTVAULT__LIMITS__MAX_SEEDING=256`).

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

use crate::error::{ManagerError, Result};

/// Top-level manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub boost: BoostConfig,
}

/// Where completed and in-progress torrent content lives on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/torrents")
}

/// Listening and protocol toggles for the underlying torrent engine.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub disable_utp: bool,
    #[serde(default)]
    pub disable_dht: bool,
    #[serde(default = "default_trackers")]
    pub default_trackers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            disable_utp: false,
            disable_dht: false,
            default_trackers: default_trackers(),
        }
    }
}

fn default_port() -> u16 {
    16661
}

fn default_trackers() -> Vec<String> {
    Vec::new()
}

/// Caps on concurrently active and seeding torrents, and the per-tick
/// upload budget handed to the active loop's piece-window selector.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_per_upload_bytes")]
    pub per_upload_bytes: u64,
    #[serde(default = "default_bucket")]
    pub bucket: u32,
    #[serde(default = "default_max_active")]
    pub max_active: u32,
    #[serde(default = "default_max_seeding")]
    pub max_seeding: u32,
    #[serde(default)]
    pub full_seed: bool,
    #[serde(default = "default_min_conns")]
    pub min_conns: u32,
    #[serde(default = "default_max_conns")]
    pub max_conns: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_upload_bytes: default_per_upload_bytes(),
            bucket: default_bucket(),
            max_active: default_max_active(),
            max_seeding: default_max_seeding(),
            full_seed: false,
            min_conns: default_min_conns(),
            max_conns: default_max_conns(),
        }
    }
}

fn default_min_conns() -> u32 {
    4
}

fn default_max_conns() -> u32 {
    50
}

fn default_per_upload_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_bucket() -> u32 {
    20
}

fn default_max_active() -> u32 {
    10
}

fn default_max_seeding() -> u32 {
    // The original source defaults this to an effectively unbounded
    // value in dev builds; a real deployment needs a finite default.
    512
}

/// Loop cadence and staleness thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_query_time_interval_secs")]
    pub query_time_interval_secs: u64,
    #[serde(default = "default_torrent_waiting_secs")]
    pub torrent_waiting_secs: u64,
    #[serde(default = "default_download_waiting_secs")]
    pub download_waiting_secs: u64,
    #[serde(default = "default_seed_interval_secs")]
    pub seed_interval_secs: u64,
    #[serde(default = "default_loops")]
    pub loops: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            query_time_interval_secs: default_query_time_interval_secs(),
            torrent_waiting_secs: default_torrent_waiting_secs(),
            download_waiting_secs: default_download_waiting_secs(),
            seed_interval_secs: default_seed_interval_secs(),
            loops: default_loops(),
        }
    }
}

fn default_query_time_interval_secs() -> u64 {
    10
}

fn default_torrent_waiting_secs() -> u64 {
    1800
}

fn default_download_waiting_secs() -> u64 {
    2700
}

fn default_seed_interval_secs() -> u64 {
    3600
}

fn default_loops() -> u32 {
    30
}

impl TimingConfig {
    pub fn query_time_interval(&self) -> Duration {
        Duration::from_secs(self.query_time_interval_secs)
    }

    pub fn torrent_waiting_time(&self) -> Duration {
        Duration::from_secs(self.torrent_waiting_secs)
    }

    pub fn download_waiting_time(&self) -> Duration {
        Duration::from_secs(self.download_waiting_secs)
    }

    pub fn default_seed_interval(&self) -> Duration {
        Duration::from_secs(self.seed_interval_secs)
    }
}

/// HTTP side-channel fetcher configuration.
#[derive(Clone, Deserialize)]
pub struct BoostConfig {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default = "default_boost_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for BoostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoostConfig")
            .field("nodes", &self.nodes.len())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            timeout_secs: default_boost_timeout_secs(),
        }
    }
}

fn default_boost_timeout_secs() -> u64 {
    15
}

impl BoostConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ManagerConfig {
    /// Load configuration from `torrentvault.toml` (if present) with
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from("torrentvault.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from(config_path: &str) -> Result<Self> {
        let config = ConfigLoader::builder()
            .set_default("storage.data_dir", "./data/torrents")?
            .set_default("network.port", i64::from(default_port()))?
            .set_default("network.disable_utp", false)?
            .set_default("network.disable_dht", false)?
            .set_default("limits.per_upload_bytes", default_per_upload_bytes() as i64)?
            .set_default("limits.bucket", i64::from(default_bucket()))?
            .set_default("limits.max_active", i64::from(default_max_active()))?
            .set_default("limits.max_seeding", i64::from(default_max_seeding()))?
            .set_default("limits.full_seed", false)?
            .set_default("limits.min_conns", i64::from(default_min_conns()))?
            .set_default("limits.max_conns", i64::from(default_max_conns()))?
            .set_default(
                "timing.query_time_interval_secs",
                default_query_time_interval_secs() as i64,
            )?
            .set_default(
                "timing.torrent_waiting_secs",
                default_torrent_waiting_secs() as i64,
            )?
            .set_default(
                "timing.download_waiting_secs",
                default_download_waiting_secs() as i64,
            )?
            .set_default(
                "timing.seed_interval_secs",
                default_seed_interval_secs() as i64,
            )?
            .set_default("timing.loops", i64::from(default_loops()))?
            .set_default("boost.timeout_secs", default_boost_timeout_secs() as i64)?
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                Environment::with_prefix("TORRENTVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(ManagerError::Config)?;

        let config: ManagerConfig = config.try_deserialize().map_err(ManagerError::Config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_constants() {
        let config = ManagerConfig::load_from("nonexistent.toml").unwrap();
        assert_eq!(config.limits.per_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.limits.bucket, 20);
        assert_eq!(config.timing.query_time_interval_secs, 10);
        assert_eq!(config.timing.torrent_waiting_secs, 1800);
        assert_eq!(config.timing.download_waiting_secs, 2700);
        assert_eq!(config.timing.seed_interval_secs, 3600);
        assert_eq!(config.timing.loops, 30);
    }

    #[test]
    fn max_seeding_has_a_finite_default() {
        let config = ManagerConfig::load_from("nonexistent.toml").unwrap();
        assert_eq!(config.limits.max_seeding, 512);
    }
}
