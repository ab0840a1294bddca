//! Parsed `.torrent` metainfo: piece hashes, file layout, and the
//! infohash derived from the bencoded `info` dictionary.

use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::error::{ManagerError, Result};
use crate::infohash::Infohash;

#[derive(Debug, Deserialize)]
struct RawTorrent {
    info: RawInfo,
    #[serde(default)]
    announce: Option<String>,
    #[serde(rename = "announce-list", default)]
    announce_list: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(default)]
    name: String,
    #[serde(rename = "piece length")]
    piece_length: i64,
    pieces: serde_bytes::ByteBuf,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    files: Option<Vec<RawFile>>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    length: i64,
    path: Vec<String>,
}

/// One file in a (possibly multi-file) torrent's layout.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub relative_path: std::path::PathBuf,
    pub length: u64,
}

/// Parsed metainfo: piece hashes, file layout, and the original
/// bytes (kept so the manager can write `.torrent` back to disk
/// byte-for-byte, e.g. when it was fetched via the boost path).
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub files: Vec<FileEntry>,
    pub trackers: Vec<String>,
    pub torrent_bytes: Vec<u8>,
}

impl Metainfo {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawTorrent = serde_bencode::from_bytes(bytes)
            .map_err(|e| ManagerError::Bencode(e.to_string()))?;

        if raw.info.pieces.len() % 20 != 0 {
            return Err(ManagerError::Bencode(
                "pieces field is not a multiple of 20 bytes".into(),
            ));
        }
        let piece_hashes = raw
            .info
            .pieces
            .chunks(20)
            .map(|c| {
                let mut h = [0u8; 20];
                h.copy_from_slice(c);
                h
            })
            .collect();

        let files = match (&raw.info.files, raw.info.length) {
            (Some(files), _) => files
                .iter()
                .map(|f| FileEntry {
                    relative_path: [raw.info.name.as_str()]
                        .iter()
                        .chain(f.path.iter())
                        .collect(),
                    length: f.length.max(0) as u64,
                })
                .collect(),
            (None, Some(length)) => vec![FileEntry {
                relative_path: raw.info.name.clone().into(),
                length: length.max(0) as u64,
            }],
            (None, None) => {
                return Err(ManagerError::Bencode(
                    "info dictionary has neither length nor files".into(),
                ))
            }
        };

        let mut trackers: Vec<String> = raw.announce.into_iter().collect();
        if let Some(list) = raw.announce_list {
            for tier in list {
                trackers.extend(tier);
            }
        }
        trackers.dedup();

        Ok(Self {
            piece_length: raw.info.piece_length.max(0) as u32,
            piece_hashes,
            files,
            trackers,
            torrent_bytes: bytes.to_vec(),
        })
    }

    /// Derive the infohash: SHA-1 of the bencoded `info` dictionary.
    pub fn infohash(&self) -> Result<Infohash> {
        // Re-parse to isolate the raw `info` sub-value rather than
        // re-encoding our own (lossy) struct, so the hash matches
        // exactly what a peer computes from the original bytes.
        let value: serde_bencode::value::Value = serde_bencode::from_bytes(&self.torrent_bytes)
            .map_err(|e| ManagerError::Bencode(e.to_string()))?;
        let serde_bencode::value::Value::Dict(dict) = value else {
            return Err(ManagerError::Bencode("torrent is not a dictionary".into()));
        };
        let info = dict
            .get(b"info".as_slice())
            .ok_or_else(|| ManagerError::Bencode("missing info dictionary".into()))?;
        let info_bytes = serde_bencode::to_bytes(info)
            .map_err(|e| ManagerError::Bencode(e.to_string()))?;

        let mut hasher = Sha1::new();
        hasher.update(&info_bytes);
        let digest: [u8; 20] = hasher.finalize().into();
        Ok(Infohash::from_bytes(digest))
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_bencode::value::Value;
    use std::collections::BTreeMap;

    fn build_single_file_torrent(name: &str, data: &[u8], piece_length: i64) -> Vec<u8> {
        let mut pieces = Vec::new();
        for chunk in data.chunks(piece_length as usize) {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            pieces.extend_from_slice(&hasher.finalize());
        }

        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::Bytes(name.as_bytes().to_vec()));
        info.insert(b"piece length".to_vec(), Value::Int(piece_length));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces));
        info.insert(b"length".to_vec(), Value::Int(data.len() as i64));

        let mut root = BTreeMap::new();
        root.insert(b"info".to_vec(), Value::Dict(info));
        root.insert(
            b"announce".to_vec(),
            Value::Bytes(b"http://tracker.example/announce".to_vec()),
        );

        serde_bencode::to_bytes(&Value::Dict(root)).unwrap()
    }

    #[test]
    fn parses_single_file_layout() {
        let data = vec![9u8; 50_000];
        let bytes = build_single_file_torrent("data", &data, 16 * 1024);
        let meta = Metainfo::parse(&bytes).unwrap();
        assert_eq!(meta.files.len(), 1);
        assert_eq!(meta.total_length(), 50_000);
        assert_eq!(meta.trackers, vec!["http://tracker.example/announce"]);
    }

    #[test]
    fn infohash_is_stable_across_parses() {
        let data = vec![1u8; 10_000];
        let bytes = build_single_file_torrent("data", &data, 4 * 1024);
        let a = Metainfo::parse(&bytes).unwrap().infohash().unwrap();
        let b = Metainfo::parse(&bytes).unwrap().infohash().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_malformed_pieces_field() {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::Bytes(b"data".to_vec()));
        info.insert(b"piece length".to_vec(), Value::Int(16384));
        info.insert(b"pieces".to_vec(), Value::Bytes(vec![0u8; 7]));
        info.insert(b"length".to_vec(), Value::Int(1));
        let mut root = BTreeMap::new();
        root.insert(b"info".to_vec(), Value::Dict(info));
        let bytes = serde_bencode::to_bytes(&Value::Dict(root)).unwrap();

        let err = Metainfo::parse(&bytes).unwrap_err();
        assert!(matches!(err, ManagerError::Bencode(_)));
    }
}
