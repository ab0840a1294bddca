//! SHA-1 piece recheck of an existing on-disk directory against parsed
//! metainfo, used to decide whether `<data>/<hex>` can be re-seeded
//! as-is rather than re-downloaded into `<tmp>/<hex>`.
//!
//! Files are read in fixed-size buffered chunks rather than
//! memory-mapped: the rest of the dependency stack has no mmap crate,
//! and chunked reads give the same piece-by-piece hash comparison.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{ManagerError, Result};
use crate::metainfo::Metainfo;

const READ_CHUNK: usize = 64 * 1024;

/// Verify every piece of `metainfo`'s file list against files rooted
/// at `dir`. Returns `Ok(())` only if every file's length matches and
/// every piece's recomputed SHA-1 matches the stored hash.
pub fn verify_directory(metainfo: &Metainfo, dir: &Path) -> Result<()> {
    let mut files: Vec<File> = Vec::with_capacity(metainfo.files.len());
    for file_meta in &metainfo.files {
        let path = dir.join(&file_meta.relative_path);
        let file = File::open(&path).map_err(ManagerError::TransientIo)?;
        let on_disk_len = file.metadata().map_err(ManagerError::TransientIo)?.len();
        if on_disk_len != file_meta.length {
            return Err(ManagerError::LengthMismatch { file: path });
        }
        files.push(file);
    }

    let mut file_idx = 0usize;
    let mut offset_in_file = 0u64;
    let mut buf = vec![0u8; READ_CHUNK];

    for (piece_index, expected_hash) in metainfo.piece_hashes.iter().enumerate() {
        let mut hasher = Sha1::new();
        let mut remaining = metainfo.piece_length as u64;
        // Last piece may be shorter than piece_length.
        let total_len: u64 = metainfo.files.iter().map(|f| f.length).sum();
        let piece_start = piece_index as u64 * metainfo.piece_length as u64;
        remaining = remaining.min(total_len.saturating_sub(piece_start));

        while remaining > 0 {
            if offset_in_file >= metainfo.files[file_idx].length {
                file_idx += 1;
                offset_in_file = 0;
                continue;
            }

            let file = &mut files[file_idx];
            file.seek(SeekFrom::Start(offset_in_file))
                .map_err(ManagerError::TransientIo)?;

            let file_remaining = metainfo.files[file_idx].length - offset_in_file;
            let to_read = remaining.min(file_remaining).min(buf.len() as u64) as usize;

            file.read_exact(&mut buf[..to_read])
                .map_err(ManagerError::TransientIo)?;
            hasher.update(&buf[..to_read]);

            offset_in_file += to_read as u64;
            remaining -= to_read as u64;
        }

        let computed: [u8; 20] = hasher.finalize().into();
        if &computed != expected_hash {
            return Err(ManagerError::HashMismatch {
                piece: piece_index as u32,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::FileEntry;
    use tempfile::TempDir;

    fn single_file_metainfo(data: &[u8], piece_length: u32) -> Metainfo {
        let mut piece_hashes = Vec::new();
        for chunk in data.chunks(piece_length as usize) {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            piece_hashes.push(hasher.finalize().into());
        }
        Metainfo {
            piece_length,
            piece_hashes,
            files: vec![FileEntry {
                relative_path: "data".into(),
                length: data.len() as u64,
            }],
            trackers: Vec::new(),
            torrent_bytes: Vec::new(),
        }
    }

    #[test]
    fn accepts_matching_directory() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 100_000];
        std::fs::write(dir.path().join("data"), &data).unwrap();
        let meta = single_file_metainfo(&data, 16 * 1024);
        assert!(verify_directory(&meta, dir.path()).is_ok());
    }

    #[test]
    fn rejects_length_mismatch() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 100_000];
        std::fs::write(dir.path().join("data"), &data[..50_000]).unwrap();
        let meta = single_file_metainfo(&data, 16 * 1024);
        let err = verify_directory(&meta, dir.path()).unwrap_err();
        assert!(matches!(err, ManagerError::LengthMismatch { .. }));
    }

    #[test]
    fn rejects_hash_mismatch_on_first_bad_piece() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 100_000];
        let meta = single_file_metainfo(&data, 16 * 1024);
        let mut corrupted = data.clone();
        corrupted[0] ^= 0xff;
        std::fs::write(dir.path().join("data"), &corrupted).unwrap();
        let err = verify_directory(&meta, dir.path()).unwrap_err();
        assert!(matches!(err, ManagerError::HashMismatch { piece: 0 }));
    }
}
