//! Compaction cursor sidecars.
//!
//! A hot vault file is accompanied by a `.cursor` file recording how far its
//! source has been consumed:
//!
//! ```text
//! target datum index (u8):  entries already present in the vault file
//! source file (varint):     stamp of the file the source reader is in
//! source position (varint): byte offset inside that source file
//! ```
//!
//! At the base resolution the source is a log file; above it the source is a
//! child vault file, with the child picked out of `target datum index` on
//! resume. A cursor that is missing, short, or undecodable is treated as
//! absent: the affected vault file is simply rebuilt from scratch, which is
//! always correct because sealed files never carry a cursor.

use crate::codec::{OpenMode, StreamReader, StreamWriter};
use crate::error::Status;
use crate::log::LogCursor;
use std::fs;
use std::path::Path;
use tracing::{debug, error, warn};

/// Resume point for one hot vault file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionCursor {
    log_cursor: LogCursor,
    target_datum_index: u8,
}

impl CompactionCursor {
    /// Creates a cursor: the source position plus the entry count already
    /// written to the target vault file.
    pub fn new(log_cursor: LogCursor, target_datum_index: u8) -> Self {
        CompactionCursor {
            log_cursor,
            target_datum_index,
        }
    }

    /// The source position.
    pub fn log_cursor(&self) -> LogCursor {
        self.log_cursor
    }

    /// Entries already present in the target vault file.
    pub fn target_datum_index(&self) -> u8 {
        self.target_datum_index
    }
}

/// Reads the cursor at `path`, treating every failure as "no cursor".
pub fn try_read(path: &Path) -> Option<CompactionCursor> {
    let mut reader = StreamReader::open(path);
    if !reader.is_open() {
        if reader.status() != Status::NotFound {
            error!(
                "failed to open cursor file {}: {:?}",
                path.display(),
                reader.status()
            );
        }
        return None;
    }
    let target_datum_index = reader.read_u8();
    let source_file = reader.read_var_u64();
    let source_position = reader.read_var_u64();
    if !reader.ok() {
        warn!(
            "unreadable cursor file {}: {:?}; ignoring it",
            path.display(),
            reader.status()
        );
        return None;
    }
    debug!(
        "read cursor {}: {:X}, {}, {}",
        path.display(),
        source_file,
        source_position,
        target_datum_index
    );
    Some(CompactionCursor::new(
        LogCursor::new(source_file as i64, source_position as i64),
        target_datum_index,
    ))
}

/// Writes `cursor` to `path`, returning false on any failure.
pub fn write(path: &Path, cursor: &CompactionCursor) -> bool {
    debug_assert!(cursor.log_cursor.position() >= 0);
    debug!(
        "writing cursor {}: {:X}, {}, {}",
        path.display(),
        cursor.log_cursor.file(),
        cursor.log_cursor.position(),
        cursor.target_datum_index
    );
    let mut writer = StreamWriter::create(path, OpenMode::Truncate);
    writer.write_u8(cursor.target_datum_index);
    writer.write_var_u64(cursor.log_cursor.file() as u64);
    writer.write_var_u64(cursor.log_cursor.position() as u64);
    if writer.close() != Status::Ok {
        error!("error writing cursor file {}", path.display());
        return false;
    }
    true
}

/// Removes the cursor at `path`, if any.
pub fn remove(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed cursor file {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove cursor file {}: {}", path.display(), err),
    }
}
