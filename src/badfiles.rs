//! Process-wide blacklist of infohashes to skip on admission and on
//! every pending/active tick.

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;

lazy_static! {
    static ref BAD_FILES: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());
}

/// Mark `hex_infohash` as bad, recording `reason` for diagnostics.
pub fn mark_bad(hex_infohash: &str, reason: impl Into<String>) {
    BAD_FILES
        .lock()
        .unwrap()
        .insert(hex_infohash.to_string(), reason.into());
}

pub fn is_bad(hex_infohash: &str) -> bool {
    BAD_FILES.lock().unwrap().contains_key(hex_infohash)
}

pub fn reason(hex_infohash: &str) -> Option<String> {
    BAD_FILES.lock().unwrap().get(hex_infohash).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_check_round_trip() {
        let hex = "feedfacefeedfacefeedfacefeedfacefeedface";
        assert!(!is_bad(hex));
        mark_bad(hex, "corrupt metainfo");
        assert!(is_bad(hex));
        assert_eq!(reason(hex).as_deref(), Some("corrupt metainfo"));
    }
}
