//! Timestamp-stamped file names and directory listings.
//!
//! Log and vault files are named by the 12-uppercase-hex-digit rendering of
//! their starting timestamp in milliseconds. Auxiliary files (notably the
//! `.cursor` sidecars) have names of a different length and are skipped when
//! listing.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Length of a timestamp-stamped file name in hex digits.
const STAMP_LEN: usize = 12;

/// Renders a timestamp as a 12-digit uppercase hex file name.
///
/// Only the low 48 bits participate, matching the 12-nibble width.
pub fn stamp(timestamp_ms: i64) -> String {
    format!("{:012X}", timestamp_ms & 0xFFFF_FFFF_FFFF)
}

/// Parses a stamped file name back into a timestamp.
///
/// Returns `None` for names that are not exactly 12 hex digits.
pub fn parse_stamp(name: &str) -> Option<i64> {
    if name.len() != STAMP_LEN {
        return None;
    }
    i64::from_str_radix(name, 16).ok()
}

/// Returns the path of the stamped file for `timestamp_ms` inside `dir`.
pub fn stamped_file(dir: &Path, timestamp_ms: i64) -> PathBuf {
    dir.join(stamp(timestamp_ms))
}

/// Lists the stamped files in a directory, sorted ascending by timestamp.
///
/// Subdirectories and files whose names are not 12 hex digits are ignored. A
/// missing or unreadable directory yields an empty list.
pub fn list_stamped_files(dir: &Path) -> Vec<i64> {
    let mut result = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return result,
        Err(err) => {
            warn!("failed to open directory {}: {}", dir.display(), err);
            return result;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(timestamp) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_stamp)
        {
            result.push(timestamp);
        }
    }
    result.sort_unstable();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stamp_is_zero_padded_uppercase() {
        assert_eq!(stamp(0), "000000000000");
        assert_eq!(stamp(0xABC), "000000000ABC");
        assert_eq!(stamp(0xFFFF_FFFF_FFFF), "FFFFFFFFFFFF");
    }

    #[test]
    fn test_stamp_roundtrip() {
        for ts in [0, 1, 1000, 0x1234_5678_9ABC] {
            assert_eq!(parse_stamp(&stamp(ts)), Some(ts));
        }
    }

    #[test]
    fn test_parse_rejects_wrong_lengths() {
        assert_eq!(parse_stamp("00000000000"), None);
        assert_eq!(parse_stamp("0000000000000"), None);
        assert_eq!(parse_stamp("000000000ABC.cursor"), None);
    }

    #[test]
    fn test_list_skips_auxiliary_files_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::write(stamped_file(dir, 2000), b"").unwrap();
        std::fs::write(stamped_file(dir, 1000), b"").unwrap();
        std::fs::write(dir.join("000000000BB8.cursor"), b"").unwrap();
        std::fs::write(dir.join("notes.txt"), b"").unwrap();
        std::fs::create_dir(dir.join("000000000000")).unwrap();

        assert_eq!(list_stamped_files(dir), vec![1000, 2000]);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_stamped_files(&temp_dir.path().join("absent")).is_empty());
    }
}
