//! Append-only log of raw samples, the write side of a collection.
//!
//! A log file is a flat sequence of tagged records with no header:
//!
//! ```text
//! TIMESTAMP = 0x01 varint(timestamp_ms)
//! DATUM     = 0x02 varint(stream_id) u16-be(value)
//! ```
//!
//! Each `TIMESTAMP` opens a bucket; the `DATUM` records that follow it carry
//! one value per stream for that bucket. The file name is the stamp of the
//! first timestamp written, and a file covers at most one flush range of
//! `4^(resolution + 4)` ms. Exactly one log file is hot at a time: the one
//! the writer is currently appending to. All earlier files are sealed.

use crate::codec::{OpenMode, StreamReader, StreamWriter};
use crate::error::Status;
use crate::layout;
use crate::resolution::Resolution;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Record tag for a timestamp marker.
const TAG_TIMESTAMP: u8 = 0x01;
/// Record tag for a stream datum.
const TAG_DATUM: u8 = 0x02;

/// One raw sample as stored in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSample {
    /// Application-defined stream identifier.
    pub stream_id: u64,
    /// Transformed value.
    pub value: u16,
}

impl LogSample {
    /// Creates a log sample.
    pub fn new(stream_id: u64, value: u16) -> Self {
        LogSample { stream_id, value }
    }
}

/// Position inside the sequence of log files: `(file stamp, byte offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogCursor {
    file: i64,
    position: i64,
}

impl LogCursor {
    /// Creates a cursor at `position` bytes into the file stamped `file`.
    pub fn new(file: i64, position: i64) -> Self {
        LogCursor { file, position }
    }

    /// The stamp of the referenced file.
    pub fn file(&self) -> i64 {
        self.file
    }

    /// The byte offset inside the referenced file.
    pub fn position(&self) -> i64 {
        self.position
    }
}

/// Lazily synced in-memory view of the log directory.
///
/// The directory is listed once on first use; subsequent file creations and
/// deletions keep the cached set current, so repeated flush passes avoid
/// re-listing.
#[derive(Debug)]
pub struct CachedLogDir {
    log_dir: PathBuf,
    synced: bool,
    entries: HashSet<i64>,
}

impl CachedLogDir {
    /// Creates a cache over `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        CachedLogDir {
            log_dir: log_dir.into(),
            synced: false,
            entries: HashSet::new(),
        }
    }

    fn sync(&mut self) {
        if self.synced {
            return;
        }
        self.entries.clear();
        for entry in layout::list_stamped_files(&self.log_dir) {
            self.entries.insert(entry);
        }
        self.synced = true;
    }

    /// Records a newly created log file.
    pub fn insert(&mut self, entry: i64) {
        self.sync();
        self.entries.insert(entry);
    }

    /// Records a removed log file.
    pub fn erase(&mut self, entry: i64) {
        self.sync();
        self.entries.remove(&entry);
    }

    /// Returns the known log file stamps, sorted ascending.
    pub fn list(&mut self) -> Vec<i64> {
        self.sync();
        let mut result: Vec<i64> = self.entries.iter().copied().collect();
        result.sort_unstable();
        result
    }
}

/// Reader over a single log file.
#[derive(Debug)]
pub struct LogFileReader {
    reader: StreamReader,
    lookahead: u8,
    checkpoint: i64,
}

impl LogFileReader {
    /// Creates a reader with no file open.
    pub fn new() -> Self {
        LogFileReader {
            reader: StreamReader::new(),
            lookahead: 0,
            checkpoint: -1,
        }
    }

    /// Opens a log file, resuming at `checkpoint` bytes in.
    ///
    /// The checkpoint must be 0 or the offset of a `TIMESTAMP` tag recorded
    /// by an earlier pass.
    pub fn open(&mut self, path: &Path, checkpoint: i64) -> bool {
        debug!("opening log file {} at {}", path.display(), checkpoint);
        self.reader = StreamReader::open(path);
        if !self.reader.is_open() {
            error!(
                "failed to open log file {}: {:?}",
                path.display(),
                self.reader.status()
            );
            return false;
        }
        if checkpoint > 0 {
            self.reader.seek(checkpoint as u64);
            if !self.reader.ok() {
                error!("failed to seek in log file {}", path.display());
                return false;
            }
        }
        self.checkpoint = checkpoint;
        self.lookahead = self.reader.read_u8();
        true
    }

    /// Returns true while a file is open.
    pub fn is_open(&self) -> bool {
        self.reader.is_open()
    }

    /// Releases the file handle.
    pub fn close(&mut self) {
        self.reader.close();
    }

    /// Byte offset of the next unread record, or -1 once a sealed file has
    /// been fully consumed.
    pub fn checkpoint(&self) -> i64 {
        self.checkpoint
    }

    /// Reads the next record: one timestamp and its samples, sorted by
    /// stream id.
    ///
    /// A record ends at the next `TIMESTAMP` tag or at the end of the file.
    /// When the file ends mid-record (a torn write, or a hot file about to
    /// receive more bytes), the call returns false; for a hot file the
    /// checkpoint is left untouched so a later pass retries, for a sealed
    /// file the reader is marked exhausted. A record that ends cleanly at
    /// EOF is returned, but for a hot file the checkpoint again stays at the
    /// record's own tag: the bucket may still grow, and the next pass will
    /// re-read it and discard it as out of order.
    pub fn next(&mut self, timestamp: &mut i64, data: &mut Vec<LogSample>, is_hot: bool) -> bool {
        data.clear();
        if self.checkpoint < 0 || !self.reader.ok() {
            return false;
        }
        if self.lookahead != TAG_TIMESTAMP {
            error!("unexpected record tag {} in log file", self.lookahead);
            return false;
        }
        *timestamp = self.reader.read_var_u64() as i64;
        self.lookahead = self.reader.read_u8();
        if !self.reader.ok() {
            return false;
        }
        loop {
            match self.reader.status() {
                Status::EndOfStream => {
                    if !is_hot {
                        debug!("reached the end of a sealed log file");
                        self.checkpoint = -1;
                    }
                    break;
                }
                Status::Ok => {}
                status => {
                    error!("failed to read log record: {:?}", status);
                    return false;
                }
            }
            match self.lookahead {
                TAG_DATUM => {
                    let stream_id = self.reader.read_var_u64();
                    let value = self.reader.read_be_u16();
                    if !self.reader.ok() {
                        return false;
                    }
                    data.push(LogSample::new(stream_id, value));
                    self.lookahead = self.reader.read_u8();
                }
                TAG_TIMESTAMP => {
                    self.checkpoint = self.reader.position() as i64 - 1;
                    break;
                }
                tag => {
                    error!("unexpected record tag {} in log file", tag);
                    return false;
                }
            }
        }
        data.sort_by_key(|sample| sample.stream_id);
        true
    }
}

impl Default for LogFileReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader over the sequence of log files, grouped into flush ranges.
///
/// One range spans `4^(resolution + 4)` ms; every log file whose stamp falls
/// inside the range belongs to its group. The range containing the hot log
/// file is flagged hot, and no range beyond it is visited in one pass.
#[derive(Debug)]
pub struct LogReader<'a> {
    log_dir: &'a Path,
    cache: &'a mut CachedLogDir,
    entries: Vec<i64>,
    group_begin: usize,
    cursor: usize,
    group_end: usize,
    hot_file: i64,
    hot_checkpoint: i64,
    reached_hot_file: bool,
    range_floor: i64,
    range_ceil: i64,
    resolution: Resolution,
    reader: LogFileReader,
}

impl<'a> LogReader<'a> {
    /// Creates a reader over `log_dir`.
    ///
    /// `hot_file` identifies the log file currently owned by the writer; pass
    /// a negative value when the writer has not created one in this process,
    /// in which case the newest file on disk is treated as hot so it is never
    /// deleted out from under a restarted writer.
    pub fn new(
        log_dir: &'a Path,
        cache: &'a mut CachedLogDir,
        resolution: Resolution,
        hot_file: i64,
    ) -> Self {
        let entries = cache.list();
        let hot_file = if hot_file >= 0 {
            hot_file
        } else {
            entries.last().copied().unwrap_or(0)
        };
        LogReader {
            log_dir,
            cache,
            entries,
            group_begin: 0,
            cursor: 0,
            group_end: 0,
            hot_file,
            hot_checkpoint: 0,
            reached_hot_file: false,
            range_floor: 0,
            range_ceil: 0,
            resolution,
            reader: LogFileReader::new(),
        }
    }

    /// Advances to the next group of log files, all within one flush range.
    pub fn next_range(&mut self) -> bool {
        if self.group_end == self.entries.len() || self.reached_hot_file {
            debug!("no more log files to process");
            return false;
        }
        self.group_begin = self.group_end;
        self.cursor = self.group_end;
        let range = self.resolution.range();
        self.range_floor = range.floor(self.entries[self.cursor]);
        self.range_ceil = range.ceil(self.entries[self.cursor]);
        while !self.reached_hot_file
            && self.group_end < self.entries.len()
            && self.entries[self.group_end] <= self.range_ceil
        {
            if self.entries[self.group_end] == self.hot_file {
                self.reached_hot_file = true;
            }
            self.group_end += 1;
        }
        debug!(
            "processing log files for the range starting at {:X}",
            self.entries[self.group_begin]
        );
        true
    }

    /// Starting timestamp of the current range.
    pub fn range_floor(&self) -> i64 {
        self.range_floor
    }

    /// Returns true if the hot log file falls inside the current range.
    pub fn is_hot_range(&self) -> bool {
        self.hot_file < self.range_ceil
    }

    /// Resumes reading at a cursor recorded by an earlier pass.
    ///
    /// Fails when the referenced file is no longer part of the current
    /// group, in which case the caller rebuilds from scratch.
    pub fn seek(&mut self, cursor: LogCursor) -> bool {
        let group = &self.entries[self.group_begin..self.group_end];
        let Ok(offset) = group.binary_search(&cursor.file()) else {
            warn!("log seek failed; file not found: {:X}", cursor.file());
            return false;
        };
        if !self
            .reader
            .open(&layout::stamped_file(self.log_dir, cursor.file()), cursor.position())
        {
            warn!("log seek failed; could not open: {:X}", cursor.file());
            return false;
        }
        self.cursor = self.group_begin + offset;
        if cursor.file() == self.hot_file {
            self.hot_checkpoint = cursor.position();
        }
        true
    }

    /// Position of the hot file's next unread record, for cursor files.
    pub fn tell(&self) -> LogCursor {
        debug_assert!(self.is_hot_range() && self.cursor == self.group_end);
        LogCursor::new(self.hot_file, self.hot_checkpoint)
    }

    /// Reads the next record of the current range, walking files in stamp
    /// order.
    pub fn next_sample(&mut self, timestamp: &mut i64, data: &mut Vec<LogSample>) -> bool {
        while self.cursor < self.group_end {
            let file = self.entries[self.cursor];
            if !self.reader.is_open() {
                if !self.reader.open(&layout::stamped_file(self.log_dir, file), 0) {
                    error!("failed to open log file {:X}", file);
                    self.cursor += 1;
                    continue;
                }
                if file == self.hot_file {
                    self.hot_checkpoint = 0;
                }
            }
            let is_hot = file == self.hot_file;
            let got_record = self.reader.next(timestamp, data, is_hot);
            if is_hot {
                self.hot_checkpoint = self.reader.checkpoint();
            }
            if got_record {
                return true;
            }
            self.reader.close();
            self.cursor += 1;
        }
        false
    }

    /// Removes every file of the current range from disk and from the cache.
    ///
    /// Only valid for ranges that do not contain the hot log file.
    pub fn delete_range(&mut self) {
        debug_assert!(!self.is_hot_range());
        for index in self.group_begin..self.group_end {
            let file = self.entries[index];
            debug!("removing processed log file {:X}", file);
            if let Err(err) = fs::remove_file(layout::stamped_file(self.log_dir, file)) {
                error!("failed to remove processed log file {:X}: {}", file, err);
            }
            self.cache.erase(file);
        }
    }
}

/// Appender that turns incoming samples into log records.
///
/// The writer keeps one hot file open at a time. A sample whose timestamp
/// moves backwards, or past the end of the hot file's range, rotates to a
/// fresh file. Within one timestamp bucket the first value per stream wins;
/// later ones are dropped.
#[derive(Debug)]
pub struct LogWriter {
    log_dir: PathBuf,
    resolution: Resolution,
    writer: StreamWriter,
    streams: HashSet<u64>,
    first_timestamp: i64,
    last_timestamp: i64,
    range_ceil: i64,
}

impl LogWriter {
    /// Creates a writer over `log_dir` at the collection's base resolution.
    pub fn new(log_dir: impl Into<PathBuf>, resolution: Resolution) -> Self {
        LogWriter {
            log_dir: log_dir.into(),
            resolution,
            writer: StreamWriter::new(),
            streams: HashSet::new(),
            first_timestamp: -1,
            last_timestamp: -1,
            range_ceil: -1,
        }
    }

    /// Returns the writer's base resolution.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Stamp of the hot log file, or -1 before the first write.
    pub fn first_timestamp(&self) -> i64 {
        self.first_timestamp
    }

    /// Returns true if a write for this bucket and stream would be dropped.
    ///
    /// Callers use this to skip value transformation for repeated samples.
    pub fn can_skip_write(&self, timestamp: i64, stream_id: u64) -> bool {
        timestamp == self.last_timestamp && self.streams.contains(&stream_id)
    }

    fn open(&mut self, cache: &mut CachedLogDir, mode: OpenMode) {
        let path = layout::stamped_file(&self.log_dir, self.first_timestamp);
        if let Err(err) = fs::create_dir_all(&self.log_dir) {
            warn!("failed to create log directory {}: {}", self.log_dir.display(), err);
            return;
        }
        self.writer = StreamWriter::create(&path, mode);
        cache.insert(self.first_timestamp);
    }

    /// Closes the hot log file. The next in-range write reopens it for
    /// append.
    pub fn close(&mut self) {
        self.writer.close();
    }

    /// Appends one sample.
    ///
    /// Write failures are absorbed into the stream's sticky status; the next
    /// flush pass surfaces them when it reads the file back.
    pub fn write(&mut self, cache: &mut CachedLogDir, timestamp: i64, stream_id: u64, value: u16) {
        if timestamp < self.last_timestamp || timestamp > self.range_ceil {
            // Either no file has been started in this process, or the
            // timestamp falls outside the hot file's range.
            self.close();
            self.first_timestamp = timestamp;
            self.range_ceil = self.resolution.range().ceil(timestamp);
            self.streams.clear();
            self.open(cache, OpenMode::CreateNew);
        } else if !self.writer.ok() {
            self.open(cache, OpenMode::Append);
        }

        if timestamp != self.last_timestamp {
            self.last_timestamp = timestamp;
            self.streams.clear();
            self.writer.write_u8(TAG_TIMESTAMP);
            self.writer.write_var_u64(timestamp as u64);
        }
        if self.streams.insert(stream_id) {
            self.writer.write_u8(TAG_DATUM);
            self.writer.write_var_u64(stream_id);
            self.writer.write_be_u16(value);
        }
    }
}
