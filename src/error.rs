//! Error types for the torrent storage manager.

use std::path::PathBuf;

use thiserror::Error;

/// Manager-wide error type.
///
/// Mirrors the error kinds a long-running torrent manager can hit:
/// transient I/O (retried by the caller's next loop tick), boost
/// failures (abandoned, not fatal), and terminal conditions like the
/// manager being closed.
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Filesystem or network I/O that is expected to succeed on retry.
    #[error("transient I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    /// Metainfo for a pending torrent could not be resolved from the swarm.
    #[error("metainfo unavailable")]
    MetainfoUnavailable,

    /// A piece hash did not match while verifying an existing directory.
    #[error("piece {piece} failed hash verification")]
    HashMismatch { piece: u32 },

    /// A file's on-disk length does not match the metainfo's file length.
    #[error("file {file:?} length does not match metainfo")]
    LengthMismatch { file: PathBuf },

    /// The boost fetcher exhausted every configured endpoint without success.
    #[error("boost fetch failed: {0}")]
    BoostFailed(String),

    /// The manager has been closed; no further admission is possible.
    #[error("torrent manager is closed")]
    ManagerClosed,

    /// The torrent is already known to the manager.
    ///
    /// Never constructed as an `Err` on the public admission path — per
    /// the admission contract this is a no-op success, not a failure.
    /// Kept as a variant so internal logging can enumerate every
    /// admission outcome in one type.
    #[error("torrent already known")]
    AlreadyKnown,

    /// Bencode metainfo could not be decoded.
    #[error("invalid metainfo: {0}")]
    Bencode(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The underlying torrent engine reported a failure.
    #[error("torrent backend error: {0}")]
    Backend(String),
}

/// Result alias used throughout the manager.
pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_mismatch_reports_piece_index() {
        let err = ManagerError::HashMismatch { piece: 7 };
        assert_eq!(err.to_string(), "piece 7 failed hash verification");
    }

    #[test]
    fn length_mismatch_reports_path() {
        let err = ManagerError::LengthMismatch {
            file: PathBuf::from("movie.mkv"),
        };
        assert!(err.to_string().contains("movie.mkv"));
    }

    #[test]
    fn already_known_is_not_a_hard_failure_in_prose() {
        assert_eq!(
            ManagerError::AlreadyKnown.to_string(),
            "torrent already known"
        );
    }
}
