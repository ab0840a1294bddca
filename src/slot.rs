//! Process-stable piece-window slot, derived once from the data
//! directory's filesystem device id so that independent nodes sharing
//! a popular torrent decorrelate their piece-start offsets.

use std::path::Path;

/// `slot = fsid mod bucket`. Falls back to slot 0 if the device id
/// cannot be read (e.g. the data directory does not exist yet).
#[cfg(unix)]
pub fn derive_slot(data_dir: &Path, bucket: u32) -> u32 {
    use std::ffi::CString;

    let bucket = bucket.max(1);

    let Ok(path_cstr) = CString::new(data_dir.to_string_lossy().as_bytes()) else {
        return 0;
    };

    // SAFETY: `stat` can be zero-initialized; it holds only primitive
    // integer fields and is only written to by the `stat` call below.
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `path_cstr` is a valid NUL-terminated pointer alive for
    // the call; `stat` is a valid mutable out-pointer.
    let result = unsafe { libc::stat(path_cstr.as_ptr(), &mut stat) };
    if result != 0 {
        return 0;
    }

    (stat.st_dev as u32) % bucket
}

#[cfg(not(unix))]
pub fn derive_slot(_data_dir: &Path, bucket: u32) -> u32 {
    0 % bucket.max(1)
}
