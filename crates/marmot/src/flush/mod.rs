//! The flush engine: draining logs into the vault pyramid.
//!
//! Vault files form a hierarchy. Four vault files at one resolution cover
//! the same time span as a single file one level up, at a quarter of the
//! entry count. Flushing walks that pyramid bottom-up: log records become
//! entries of a base-resolution vault file, and every four entries written
//! at one level aggregate into one entry at the next.
//!
//! Compaction is incremental. A partially filled vault file is hot, and is
//! accompanied by a cursor sidecar recording how far its source has been
//! consumed (see [`cursor`]). Each pass picks up where the cursor points,
//! appends what the source now provides, and leaves a fresh cursor behind.
//! If a cursor is missing or unreadable the affected file is rebuilt from
//! scratch against the same inputs, so an interruption at any byte is
//! recoverable.
//!
//! [`Writer::flush_some`] performs one bounded step: either one log-to-vault
//! pass over the next pending range, or one level of the compaction ladder.
//! [`Writer::flush_all`] repeats it until the store is fully drained.

pub mod aggregate;
pub mod cursor;

use crate::collection::Collection;
use crate::error::{Result, Status, VaultError};
use crate::log::{CachedLogDir, LogReader, LogSample, LogWriter};
use crate::resolution::{Resolution, RANGE_ELEMENT_COUNT};
use crate::transform::Transform;
use crate::vault::file::{VaultFileReader, VaultWriter};
use crate::vault::VaultFileRef;
use self::aggregate::Aggregator;
use self::cursor::CompactionCursor;
use std::path::PathBuf;
use tracing::{debug, error};

/// Sticky health signal of a writer's flush machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoState {
    /// All flush work so far has reached the disk.
    #[default]
    Ok,
    /// Some flush step failed; on-disk state is consistent but behind.
    Error,
}

/// Outcome of one compaction ladder step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compaction {
    /// The ladder is complete; nothing above this level needs work.
    Done,
    /// One level was compacted; the level above it is next.
    InProgress,
}

/// Write interface to a monitoring collection.
///
/// Exactly one writer per collection is supported, and all calls must come
/// from one execution context. User writes go through
/// [`WriteTransaction`]; [`Writer::flush_some`] and [`Writer::flush_all`]
/// move logged data into the vault.
#[derive(Debug)]
pub struct Writer<'a> {
    collection: &'a Collection,
    log_dir: PathBuf,
    cache: CachedLogDir,
    log: LogWriter,
    flush_in_progress: bool,
    compaction_head: VaultFileRef,
    compaction_head_index_end: usize,
    is_hot_range: bool,
    current_range_hot: bool,
    io_state: IoState,
}

impl<'a> Writer<'a> {
    /// Creates the writer for `collection`.
    pub fn new(collection: &'a Collection) -> Self {
        let log_dir = collection.log_dir();
        Writer {
            collection,
            cache: CachedLogDir::new(&log_dir),
            log: LogWriter::new(&log_dir, collection.resolution()),
            log_dir,
            flush_in_progress: false,
            compaction_head: VaultFileRef::default(),
            compaction_head_index_end: 0,
            is_hot_range: false,
            current_range_hot: false,
            io_state: IoState::Ok,
        }
    }

    /// Returns the collection this writer feeds.
    pub fn collection(&self) -> &Collection {
        self.collection
    }

    /// Sticky health signal; once [`IoState::Error`], it stays set.
    pub fn io_state(&self) -> IoState {
        self.io_state
    }

    /// Returns true while a compaction ladder is mid-climb.
    pub fn is_flush_in_progress(&self) -> bool {
        self.flush_in_progress
    }

    /// Performs one bounded unit of flush work.
    ///
    /// When no ladder is mid-climb, drains the next pending log range into
    /// its base-resolution vault file and remembers it as the new ladder.
    /// Otherwise compacts one level upward. Hosts call this from their event
    /// loop and yield in between.
    pub fn flush_some(&mut self) {
        if !self.flush_in_progress {
            self.start_ladder(false);
            return;
        }

        let child = self.compaction_head;
        let parent = child.parent();
        let index_end = 64 * child.sibling_index() + (self.compaction_head_index_end >> 2);
        self.compaction_head = parent;
        self.compaction_head_index_end = index_end;
        if parent.resolution() > Resolution::MAX || index_end == 0 {
            debug!("vault compaction finished (hot: {})", self.is_hot_range);
            self.flush_in_progress = false;
            self.start_ladder(true);
            return;
        }
        // A non-terminal sibling leaves the parent file hot as well.
        self.is_hot_range |= parent.sibling_index() < 3;

        match compact_vault_one_level(self.collection, parent, index_end) {
            Ok(Compaction::InProgress) => {}
            Ok(Compaction::Done) => {
                self.flush_in_progress = false;
                self.start_ladder(true);
            }
            Err(err) => {
                error!(
                    "vault compaction failed at resolution {}: {}",
                    parent.resolution().level(),
                    err
                );
                self.io_state = IoState::Error;
                self.flush_in_progress = false;
            }
        }
    }

    /// Flushes until every pending log range, including the hot one, has
    /// been drained and compacted as far as the data allows.
    pub fn flush_all(&mut self) {
        loop {
            let was_in_progress = self.flush_in_progress;
            self.flush_some();
            if self.io_state == IoState::Error {
                return;
            }
            if !self.flush_in_progress {
                if !was_in_progress {
                    // Nothing was pending at all.
                    return;
                }
                if self.current_range_hot {
                    // The ladder over the hot range just completed; there is
                    // nothing further to drain in this pass.
                    return;
                }
            }
        }
    }

    /// Begins a new ladder over the next pending log range, if any.
    ///
    /// With `skip_hot` set, a range containing the hot log file is left
    /// alone; it is picked up by the next `flush_some` call instead, which
    /// bounds the work done per call.
    fn start_ladder(&mut self, skip_hot: bool) {
        let resolution = self.collection.resolution();
        let hot_file = self.log.first_timestamp();
        let mut reader = LogReader::new(&self.log_dir, &mut self.cache, resolution, hot_file);
        if !reader.next_range() {
            return;
        }
        if skip_hot && reader.is_hot_range() {
            return;
        }
        let ref_ = VaultFileRef::lookup(reader.range_floor(), resolution);
        match write_to_vault(self.collection, &mut reader, ref_) {
            Ok(index_end) => {
                self.current_range_hot = reader.is_hot_range();
                self.is_hot_range = reader.is_hot_range();
                self.compaction_head = ref_;
                self.compaction_head_index_end = index_end;
                self.flush_in_progress = true;
            }
            Err(err) => {
                error!("log flush failed for range {:X}: {}", ref_.timestamp(), err);
                self.io_state = IoState::Error;
            }
        }
    }
}

/// A single write operation against a collection.
///
/// Create one per batch of samples: the log file is closed when the
/// transaction goes out of scope, so the bytes are on disk before control
/// returns to the host loop.
#[derive(Debug)]
pub struct WriteTransaction<'w, 'a> {
    transform: Transform,
    writer: &'w mut Writer<'a>,
}

impl<'w, 'a> WriteTransaction<'w, 'a> {
    /// Opens a transaction on `writer`.
    pub fn new(writer: &'w mut Writer<'a>) -> Self {
        WriteTransaction {
            transform: *writer.collection.transform(),
            writer,
        }
    }

    /// Writes one sample, quantizing the value through the collection's
    /// transform.
    ///
    /// The timestamp is rounded down to the collection resolution; within
    /// one bucket the first value per stream wins.
    pub fn write(&mut self, timestamp_ms: i64, stream_id: u64, value: f32) {
        let rounded = self
            .writer
            .log
            .resolution()
            .floor(timestamp_ms);
        if self.writer.log.can_skip_write(rounded, stream_id) {
            // Fast path: this bucket already has data for the stream.
            return;
        }
        let transformed = self.transform.apply(value);
        self.writer
            .log
            .write(&mut self.writer.cache, rounded, stream_id, transformed);
    }
}

impl Drop for WriteTransaction<'_, '_> {
    fn drop(&mut self) {
        self.writer.log.close();
    }
}

/// Drains the reader's current range into its base-resolution vault file.
///
/// Returns the number of entries now present in the file. For a hot range a
/// fresh cursor is left next to the file; for a sealed range the file is
/// padded to 256 entries and the consumed log files are deleted.
fn write_to_vault(
    collection: &Collection,
    reader: &mut LogReader<'_>,
    ref_: VaultFileRef,
) -> Result<usize> {
    let mut writer = VaultWriter::new(collection, ref_);
    let cursor_path = collection.cursor_file_path(ref_);

    let mut resumed = false;
    if let Some(found) = cursor::try_read(&cursor_path) {
        if reader.seek(found.log_cursor()) {
            let status = writer.open_existing(usize::from(found.target_datum_index()));
            if status != Status::Ok {
                return Err(VaultError::Stream(status));
            }
            resumed = true;
        }
    }
    if !resumed {
        let status = writer.open_new();
        if status != Status::Ok {
            return Err(VaultError::Stream(status));
        }
    }
    cursor::remove(&cursor_path);

    let step = ref_.time_step();
    let mut current = ref_.timestamp() + ref_.time_steps(writer.write_index() as i64);
    let mut timestamp = 0i64;
    let mut data: Vec<LogSample> = Vec::new();
    while reader.next_sample(&mut timestamp, &mut data) {
        if timestamp < current {
            // Out-of-order across log files; drop.
            continue;
        }
        while current < timestamp {
            writer.write_empty();
            current += step;
        }
        debug_assert_eq!(current, timestamp);
        writer.write_log_data(&data);
        current += step;
    }
    if !writer.ok() {
        return Err(VaultError::Stream(writer.status()));
    }

    if reader.is_hot_range() {
        if writer.write_index() < RANGE_ELEMENT_COUNT {
            let cursor = CompactionCursor::new(reader.tell(), writer.write_index() as u8);
            if !cursor::write(&cursor_path, &cursor) {
                return Err(VaultError::Stream(Status::IoError));
            }
        } else {
            // The hot range filled its file to the brim; the file is sealed
            // and needs no cursor. The log files stay until the writer moves
            // on and the range stops being hot.
            debug!("hot range {:X} filled a whole vault file", ref_.timestamp());
        }
    } else {
        while writer.write_index() < RANGE_ELEMENT_COUNT {
            writer.write_empty();
        }
        reader.delete_range();
    }

    let index_end = writer.write_index();
    let status = writer.close();
    if status != Status::Ok {
        return Err(VaultError::Stream(status));
    }
    Ok(index_end)
}

/// Compacts one level: folds child entries into the parent file at `head`.
///
/// `index_end` is the parent entry count demanded by what the child level
/// now holds. Resumes from the parent's cursor when possible, otherwise
/// rebuilds the parent from its four children. Leaves a fresh cursor when
/// the parent stays hot.
fn compact_vault_one_level(
    collection: &Collection,
    head: VaultFileRef,
    index_end: usize,
) -> Result<Compaction> {
    debug!(
        "compacting vault {:X} at resolution {}, end index {}",
        head.timestamp(),
        head.resolution().level(),
        index_end
    );
    let mut writer = VaultWriter::new(collection, head);
    let mut reader = VaultFileReader::new();
    let cursor_path = collection.cursor_file_path(head);

    let mut resumed = false;
    if let Some(found) = cursor::try_read(&cursor_path) {
        let target = usize::from(found.target_datum_index());
        let child = head.child(target / 64);
        let child_index = (target % 64) << 2;
        if reader.open(
            &collection.vault_file_path(child),
            child,
            child_index,
            found.log_cursor().position(),
        ) {
            let status = writer.open_existing(target);
            if status != Status::Ok {
                return Err(VaultError::Stream(status));
            }
            resumed = true;
        }
    }
    if !resumed {
        let child = head.child(0);
        reader.open(&collection.vault_file_path(child), child, 0, 0);
        let status = writer.open_new();
        if status != Status::Ok {
            return Err(VaultError::Stream(status));
        }
    }
    if writer.write_index() >= index_end {
        // A resumed parent can already be ahead of what the just-flushed
        // child demands. Nothing to write, and the cursor on disk still
        // describes the file exactly, so it stays.
        return Ok(Compaction::Done);
    }
    cursor::remove(&cursor_path);

    let mut samples = Vec::new();
    let mut aggregator = Aggregator::default();
    while writer.write_index() < index_end {
        debug_assert!(reader.index() + 4 <= RANGE_ELEMENT_COUNT);
        for _ in 0..4 {
            reader.next(&mut samples);
            for sample in &samples {
                if sample.fill > 0 {
                    aggregator.add(sample);
                }
            }
        }
        writer.write_aggregated_data(&aggregator);
        aggregator.clear();
        if reader.past_eof() {
            let next = reader.vault_ref().next();
            reader.open(&collection.vault_file_path(next), next, 0, 0);
        }
    }

    if writer.write_index() > 0 && writer.write_index() < RANGE_ELEMENT_COUNT {
        let cursor = CompactionCursor::new(reader.tell(), writer.write_index() as u8);
        if !cursor::write(&cursor_path, &cursor) {
            return Err(VaultError::Stream(Status::IoError));
        }
    }
    reader.close();
    let status = writer.close();
    if !reader.good() {
        error!("failed to process the input vault file");
        if let Some((major, minor)) = reader.malformed_header() {
            return Err(VaultError::InvalidHeader { major, minor });
        }
        return Err(VaultError::Stream(Status::IoError));
    }
    if status != Status::Ok {
        error!("failed to process the output vault file: {:?}", status);
        return Err(VaultError::Stream(status));
    }
    debug!(
        "finished compacting vault {:X}, end index {}",
        head.timestamp(),
        writer.write_index()
    );
    Ok(Compaction::InProgress)
}
