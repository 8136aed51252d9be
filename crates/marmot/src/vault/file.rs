//! Vault file format: reader and writer.
//!
//! A vault file is a two-byte header followed by up to 256 entries, parsed
//! positionally with no per-entry delimiter:
//!
//! ```text
//! header:
//!   major version (u8): currently 1
//!   minor version (u8): currently 1
//! entry[]:
//!   sample count (varint)
//!   sample[]:
//!     stream id (varint)
//!     avg       (u16-be)
//!     min       (u16-be)
//!     max       (u16-be)
//!     fill      (u16-be)
//! ```
//!
//! The file name implies the starting timestamp and the directory implies
//! the resolution. A finished file always has 256 entries and is immutable;
//! a partially filled file is hot and grows by appends.

use crate::codec::{OpenMode, StreamReader, StreamWriter};
use crate::collection::Collection;
use crate::error::Status;
use crate::flush::aggregate::Aggregator;
use crate::log::{LogCursor, LogSample};
use crate::resolution::{Resolution, RANGE_ELEMENT_COUNT};
use crate::vault::{Sample, VaultFileRef, FULL_FILL};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Major version byte of the vault file header.
pub const VAULT_VERSION_MAJOR: u8 = 0x01;
/// Minor version byte of the vault file header.
pub const VAULT_VERSION_MINOR: u8 = 0x01;

/// Finest resolution at which stored fills are still trusted on read.
///
/// At resolutions up to about one minute the fill is implied rather than
/// stored; readers report such entries as fully covered regardless of the
/// value on disk.
const IMPLIED_FILL_MAX: Resolution = Resolution::MILLIS_65536;

/// Appender for one vault file.
#[derive(Debug)]
pub struct VaultWriter {
    ref_: VaultFileRef,
    path: PathBuf,
    write_index: usize,
    writer: StreamWriter,
}

impl VaultWriter {
    /// Creates a writer for the vault file identified by `ref_`.
    pub fn new(collection: &Collection, ref_: VaultFileRef) -> Self {
        VaultWriter {
            ref_,
            path: collection.vault_file_path(ref_),
            write_index: 0,
            writer: StreamWriter::new(),
        }
    }

    /// Returns the identity of the file being written.
    pub fn vault_ref(&self) -> VaultFileRef {
        self.ref_
    }

    /// Index of the next entry to be written.
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Returns true while the underlying stream is healthy.
    pub fn ok(&self) -> bool {
        self.writer.ok()
    }

    /// Returns the underlying stream status.
    pub fn status(&self) -> Status {
        self.writer.status()
    }

    /// Opens the file fresh, truncating any previous content, and writes the
    /// header.
    pub fn open_new(&mut self) -> Status {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                error!("failed to create vault directory {}: {}", parent.display(), err);
                return Status::IoError;
            }
        }
        debug!("opening a new vault file {} for write", self.path.display());
        self.writer = StreamWriter::create(&self.path, OpenMode::Truncate);
        self.write_index = 0;
        self.writer.write_u8(VAULT_VERSION_MAJOR);
        self.writer.write_u8(VAULT_VERSION_MINOR);
        if !self.writer.ok() {
            error!(
                "failed to open vault file {} for write: {:?}",
                self.path.display(),
                self.writer.status()
            );
        }
        self.writer.status()
    }

    /// Opens the file for append, with `write_index` entries already present.
    pub fn open_existing(&mut self, write_index: usize) -> Status {
        debug_assert!(write_index < RANGE_ELEMENT_COUNT);
        debug!("opening an existing vault file {} for append", self.path.display());
        self.writer = StreamWriter::create(&self.path, OpenMode::Append);
        self.write_index = write_index;
        if !self.writer.ok() {
            error!(
                "failed to open vault file {} for append: {:?}",
                self.path.display(),
                self.writer.status()
            );
        }
        self.writer.status()
    }

    /// Flushes and closes the file, reporting the final stream status.
    pub fn close(&mut self) -> Status {
        self.writer.close()
    }

    /// Writes one entry with no samples.
    pub fn write_empty(&mut self) {
        debug_assert!(self.write_index < RANGE_ELEMENT_COUNT);
        self.writer.write_var_u64(0);
        if !self.writer.ok() {
            error!(
                "failed to write empty entry at index {}: {:?}",
                self.write_index,
                self.writer.status()
            );
        }
        self.write_index += 1;
    }

    /// Writes one entry directly from log samples.
    ///
    /// Every sample covers its whole bucket: avg, min and max all carry the
    /// logged value and the fill is 100%.
    pub fn write_log_data(&mut self, data: &[LogSample]) {
        debug_assert!(self.write_index < RANGE_ELEMENT_COUNT);
        self.writer.write_var_u64(data.len() as u64);
        for sample in data {
            self.writer.write_var_u64(sample.stream_id);
            self.writer.write_be_u16(sample.value);
            self.writer.write_be_u16(sample.value);
            self.writer.write_be_u16(sample.value);
            self.writer.write_be_u16(FULL_FILL);
        }
        if !self.writer.ok() {
            error!(
                "failed to write {} samples at index {}: {:?}",
                data.len(),
                self.write_index,
                self.writer.status()
            );
        }
        self.write_index += 1;
    }

    /// Writes one entry from an aggregator snapshot.
    pub fn write_aggregated_data(&mut self, aggregator: &Aggregator) {
        debug_assert!(self.write_index < RANGE_ELEMENT_COUNT);
        self.writer.write_var_u64(aggregator.len() as u64);
        for (stream_id, acc) in aggregator.iter() {
            self.writer.write_var_u64(stream_id);
            self.writer.write_be_u16(acc.avg_value());
            self.writer.write_be_u16(acc.min_value());
            self.writer.write_be_u16(acc.max_value());
            // The summed child fills over four; can come out as zero.
            self.writer.write_be_u16(acc.fill());
        }
        if !self.writer.ok() {
            error!(
                "failed to write aggregated entry at index {}: {:?}",
                self.write_index,
                self.writer.status()
            );
        }
        self.write_index += 1;
    }
}

/// Sequential reader over one vault file.
///
/// A missing file is a benign state: the reader stays positioned and yields
/// empty entries until it runs past the end of the file's 256 slots.
#[derive(Debug)]
pub struct VaultFileReader {
    ref_: VaultFileRef,
    reader: StreamReader,
    index: usize,
    position: u64,
    // Sticks for the reader's lifetime, across child-file advances.
    malformed: Option<(u8, u8)>,
}

impl VaultFileReader {
    /// Creates a reader with no file open.
    pub fn new() -> Self {
        VaultFileReader {
            ref_: VaultFileRef::default(),
            reader: StreamReader::new(),
            index: 0,
            position: 0,
            malformed: None,
        }
    }

    /// Opens the vault file at `path`, positioned at entry `index`.
    ///
    /// With `offset` 0 the header is read and validated; a positive offset
    /// seeks straight to a byte position recorded by an earlier pass.
    /// Returns false when no readable file is behind the reference, which
    /// callers treat as a file of empty entries.
    pub fn open(&mut self, path: &Path, ref_: VaultFileRef, index: usize, offset: i64) -> bool {
        self.ref_ = ref_;
        self.reader = StreamReader::open(path);
        self.index = index;
        self.position = 0;
        if !self.reader.is_open() {
            if self.reader.status() == Status::NotFound {
                debug!(
                    "vault file {} doesn't exist; treating as-if empty",
                    path.display()
                );
            } else {
                error!(
                    "failed to open vault file {} for read: {:?}",
                    path.display(),
                    self.reader.status()
                );
            }
            return false;
        }
        if offset == 0 {
            if !self.read_header() {
                self.reader.close();
                return false;
            }
            self.position = self.reader.position();
        } else if offset < 0 {
            error!("invalid vault offset: {}", offset);
            return false;
        } else {
            self.reader.seek(offset as u64);
            if !self.reader.ok() {
                error!("failed to seek in vault file {}", path.display());
                return false;
            }
            self.position = offset as u64;
        }
        debug!(
            "vault file {} opened for read at index {} and position {}",
            path.display(),
            index,
            offset
        );
        true
    }

    fn read_header(&mut self) -> bool {
        let major = self.reader.read_u8();
        let minor = self.reader.read_u8();
        if !self.reader.ok() {
            error!(
                "failed to read vault file header: {:?}",
                self.reader.status()
            );
            return false;
        }
        if major != VAULT_VERSION_MAJOR || minor != VAULT_VERSION_MINOR {
            error!("unsupported vault file version: {}.{}", major, minor);
            self.malformed = Some((major, minor));
            return false;
        }
        true
    }

    /// Version pair of a rejected header, if one was encountered.
    pub(crate) fn malformed_header(&self) -> Option<(u8, u8)> {
        self.malformed
    }

    /// Returns the identity of the file being read.
    pub fn vault_ref(&self) -> VaultFileRef {
        self.ref_
    }

    /// Index of the next entry to be read.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns true once the reader has moved past the last entry slot.
    pub fn past_eof(&self) -> bool {
        self.index >= RANGE_ELEMENT_COUNT
    }

    /// Returns true unless a real failure occurred.
    ///
    /// A missing file and a clean or premature end of stream all count as
    /// good; only IO errors and malformed content do not.
    pub fn good(&self) -> bool {
        self.malformed.is_none() && self.reader.status() != Status::IoError
    }

    /// Releases the file handle.
    pub fn close(&mut self) {
        self.reader.close();
    }

    /// Reads the next entry into `samples`, advancing by one bucket.
    ///
    /// Returns false with an empty `samples` for missing data: an absent
    /// file, a truncated file, or a position past the last slot.
    pub fn next(&mut self, samples: &mut Vec<Sample>) -> bool {
        samples.clear();
        if self.past_eof() {
            return false;
        }
        if !self.reader.ok() {
            self.index += 1;
            return false;
        }
        let ignore_fill = self.ref_.resolution() <= IMPLIED_FILL_MAX;
        if self.read_entry(samples, ignore_fill) {
            self.index += 1;
            if self.past_eof() {
                debug!("scanned the entire vault file");
                self.position = self.reader.position();
                self.reader.close();
            }
            return true;
        }
        samples.clear();
        if self.reader.status() == Status::EndOfStream {
            debug!("vault file ends early at index {}", self.index);
            self.position = 0;
        } else {
            self.position = self.reader.position();
            error!("error reading vault entry at index {}", self.index);
        }
        self.index += 1;
        self.reader.close();
        false
    }

    fn read_entry(&mut self, samples: &mut Vec<Sample>, ignore_fill: bool) -> bool {
        let sample_count = self.reader.read_var_u64();
        if !self.reader.ok() {
            if self.reader.status() != Status::EndOfStream {
                error!(
                    "failed to read entry from the vault file: {:?}",
                    self.reader.status()
                );
            }
            return false;
        }
        for _ in 0..sample_count {
            let stream_id = self.reader.read_var_u64();
            let avg = self.reader.read_be_u16();
            let min = self.reader.read_be_u16();
            let max = self.reader.read_be_u16();
            let mut fill = self.reader.read_be_u16();
            if ignore_fill {
                fill = FULL_FILL;
            }
            if !self.reader.ok() {
                error!(
                    "failed to read a sample from the vault file: {:?}",
                    self.reader.status()
                );
                return false;
            }
            samples.push(Sample::new(stream_id, avg, min, max, fill));
        }
        true
    }

    /// Skips ahead so the next entry read covers `timestamp`.
    ///
    /// Skipping past the last slot closes the file; skipping within an
    /// absent file just advances the index.
    pub fn seek_forward(&mut self, timestamp: i64) {
        let mut skip = (timestamp - self.ref_.timestamp()) >> (self.ref_.resolution().level() << 1);
        if skip <= 0 {
            return;
        }
        debug!("skipping {} vault entries", skip);
        if skip as usize + self.index >= RANGE_ELEMENT_COUNT {
            self.index = RANGE_ELEMENT_COUNT;
            self.reader.close();
            return;
        }
        if self.reader.ok() {
            let mut ignored = Vec::new();
            while !self.past_eof() && skip > 0 {
                self.next(&mut ignored);
                skip -= 1;
            }
        } else {
            self.index += skip as usize;
        }
    }

    /// Position of the reader for cursor files.
    ///
    /// At index 0 the file may never have existed; the cursor then simply
    /// points at its beginning.
    pub fn tell(&mut self) -> LogCursor {
        if self.index == 0 {
            return LogCursor::new(self.ref_.timestamp(), 0);
        }
        if self.reader.ok() {
            self.position = self.reader.position();
        }
        LogCursor::new(self.ref_.timestamp(), self.position as i64)
    }
}

impl Default for VaultFileReader {
    fn default() -> Self {
        Self::new()
    }
}
