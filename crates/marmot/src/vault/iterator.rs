//! Scanning the vault at one resolution, across file boundaries.

use crate::collection::Collection;
use crate::resolution::Resolution;
use crate::vault::file::VaultFileReader;
use crate::vault::{Sample, VaultFileRef};
use tracing::debug;

/// Iterator over the collected data at a fixed resolution.
///
/// Starts at a given timestamp (rounded down to the resolution) and yields
/// one entry per bucket, opening subsequent vault files as needed. Buckets
/// with no stored data, including the whole future, yield empty entries.
#[derive(Debug)]
pub struct VaultIterator<'a> {
    collection: &'a Collection,
    current_ref: VaultFileRef,
    current: VaultFileReader,
}

impl<'a> VaultIterator<'a> {
    /// Creates an iterator over `collection` starting at `start`.
    pub fn new(collection: &'a Collection, start: i64, resolution: Resolution) -> Self {
        let current_ref = VaultFileRef::lookup(start, resolution);
        let mut current = VaultFileReader::new();
        current.open(
            &collection.vault_file_path(current_ref),
            current_ref,
            0,
            0,
        );
        current.seek_forward(start);
        VaultIterator {
            collection,
            current_ref,
            current,
        }
    }

    /// Timestamp of the bucket the iterator currently points at.
    pub fn cursor(&self) -> i64 {
        self.current_ref.timestamp_at(self.current.index())
    }

    /// Advances by one bucket, filling `samples` with the entry's rows.
    pub fn next(&mut self, samples: &mut Vec<Sample>) {
        if self.current.past_eof() {
            self.current_ref = self.current_ref.next();
            debug!("advancing to next vault file: {:X}", self.current_ref.timestamp());
            self.current.open(
                &self.collection.vault_file_path(self.current_ref),
                self.current_ref,
                0,
                0,
            );
        }
        self.current.next(samples);
    }
}
