//! End-to-end tests of the write path and the compaction engine.

use marmot::vault::VaultFileReader;
use marmot::{
    Collection, CollectionConfig, IoState, Resolution, Sample, VaultFileRef, VaultIterator,
    WriteTransaction, Writer, FULL_FILL,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn make_collection(dir: &Path) -> Collection {
    Collection::new(
        dir,
        "test",
        CollectionConfig {
            resolution: Resolution::MILLIS_1,
            ..CollectionConfig::default()
        },
    )
}

/// Reads every entry present in the vault file identified by `ref_`.
fn read_entries(collection: &Collection, ref_: VaultFileRef) -> Vec<Vec<Sample>> {
    let mut reader = VaultFileReader::new();
    reader.open(&collection.vault_file_path(ref_), ref_, 0, 0);
    let mut entries = Vec::new();
    let mut samples = Vec::new();
    while reader.next(&mut samples) {
        entries.push(samples.clone());
    }
    entries
}

/// Entry count already written to the vault file, per its cursor sidecar.
fn cursor_target(collection: &Collection, ref_: VaultFileRef) -> u8 {
    let bytes = fs::read(collection.cursor_file_path(ref_)).expect("cursor file should exist");
    bytes[0]
}

/// Collects the full directory tree as relative path -> content.
fn collect_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[test]
fn test_single_bucket_aggregates_to_parent() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        tx.write(0, 1, 10.0);
        tx.write(1, 1, 20.0);
        tx.write(2, 1, 30.0);
        tx.write(3, 1, 40.0);
        tx.write(4, 1, 50.0);
    }
    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);

    let transform = collection.transform();
    let values: Vec<u16> = [10.0f32, 20.0, 30.0, 40.0]
        .iter()
        .map(|v| transform.apply(*v))
        .collect();
    let expected_avg = (values.iter().map(|v| u32::from(*v)).sum::<u32>() / 4) as u16;

    let parent = VaultFileRef::lookup(0, Resolution::from_level(1));
    let entries = read_entries(&collection, parent);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].len(), 1);
    let sample = entries[0][0];
    assert_eq!(sample.stream_id, 1);
    assert_eq!(sample.avg_value, expected_avg);
    assert_eq!(sample.min_value, *values.iter().min().unwrap());
    assert_eq!(sample.max_value, *values.iter().max().unwrap());
    assert_eq!(sample.fill, FULL_FILL);

    // The parent is hot, so it carries a resume cursor.
    assert!(collection.cursor_file_path(parent).exists());
}

#[test]
fn test_two_level_aggregation() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        for i in 0..16 {
            tx.write(i, 1, ((i + 1) * 10) as f32);
        }
        tx.write(16, 1, 999.0);
    }
    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);

    let transform = collection.transform();
    let applied: Vec<u16> = (0..16)
        .map(|i| transform.apply(((i + 1) * 10) as f32))
        .collect();
    let expected_avg = (applied.iter().map(|v| u32::from(*v)).sum::<u32>() / 16) as u16;

    let grandparent = VaultFileRef::lookup(0, Resolution::from_level(2));
    let entries = read_entries(&collection, grandparent);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].len(), 1);
    let sample = entries[0][0];
    assert_eq!(sample.avg_value, expected_avg);
    assert_eq!(sample.min_value, transform.apply(10.0));
    assert_eq!(sample.max_value, transform.apply(160.0));
    assert_eq!(sample.fill, FULL_FILL);
}

#[test]
fn test_hot_tail_is_flushed_and_preserved() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        for i in 0..4 {
            tx.write(i, 1, 10.0 * (i + 1) as f32);
        }
    }
    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);

    let base = VaultFileRef::lookup(0, Resolution::MILLIS_1);
    let parent = VaultFileRef::lookup(0, Resolution::from_level(1));

    // All four buckets landed, including the tail one still open for growth.
    let entries = read_entries(&collection, base);
    assert_eq!(entries.len(), 4);
    for entry in &entries {
        assert_eq!(entry.len(), 1);
    }
    assert_eq!(cursor_target(&collection, base), 4);
    assert_eq!(cursor_target(&collection, parent), 1);

    let parent_bytes_before = fs::read(collection.vault_file_path(parent)).unwrap();

    {
        let mut tx = WriteTransaction::new(&mut writer);
        tx.write(4, 1, 50.0);
    }
    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);

    // The base cursor advanced and the parent bytes were not rewritten.
    assert_eq!(cursor_target(&collection, base), 5);
    let parent_bytes_after = fs::read(collection.vault_file_path(parent)).unwrap();
    assert!(parent_bytes_after.starts_with(&parent_bytes_before));
    assert_eq!(parent_bytes_before, parent_bytes_after);

    let entries = read_entries(&collection, base);
    assert_eq!(entries.len(), 5);
}

#[test]
fn test_first_write_wins_within_bucket() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        tx.write(0, 1, 10.0);
        tx.write(0, 1, 20.0);
    }
    writer.flush_all();

    let base = VaultFileRef::lookup(0, Resolution::MILLIS_1);
    let entries = read_entries(&collection, base);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].len(), 1);
    assert_eq!(entries[0][0].avg_value, collection.transform().apply(10.0));
}

#[test]
fn test_sealed_range_pads_deletes_logs_and_drops_cursor() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        for i in 0..=256 {
            tx.write(i, 1, 1.0);
        }
    }
    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);

    let sealed = VaultFileRef::lookup(0, Resolution::MILLIS_1);
    let entries = read_entries(&collection, sealed);
    assert_eq!(entries.len(), 256);
    assert!(entries.iter().all(|entry| entry.len() == 1));
    // A sealed file carries no cursor.
    assert!(!collection.cursor_file_path(sealed).exists());

    // The consumed log range is gone; the hot log file remains.
    let log_dir = collection.log_dir();
    assert!(!log_dir.join("000000000000").exists());
    assert!(log_dir.join("000000000100").exists());

    // The write at 256 landed in the next vault file, which stays hot.
    let hot = VaultFileRef::lookup(256, Resolution::MILLIS_1);
    let entries = read_entries(&collection, hot);
    assert_eq!(entries.len(), 1);
    assert!(collection.cursor_file_path(hot).exists());
}

#[test]
fn test_gap_buckets_are_padded_empty() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        tx.write(0, 1, 10.0);
        tx.write(7, 1, 20.0);
    }
    writer.flush_all();

    let base = VaultFileRef::lookup(0, Resolution::MILLIS_1);
    let entries = read_entries(&collection, base);
    assert_eq!(entries.len(), 8);
    assert_eq!(entries[0].len(), 1);
    for entry in &entries[1..7] {
        assert!(entry.is_empty());
    }
    assert_eq!(entries[7].len(), 1);
}

#[test]
fn test_flush_some_storm_matches_single_flush_all() {
    let writes: Vec<(i64, u64, f32)> = vec![
        (0, 1, 10.0),
        (0, 2, -3.5),
        (1, 1, 11.0),
        (2, 1, 12.0),
        (3, 2, 7.25),
        (5, 1, 14.0),
        (300, 1, 20.0),
        (301, 2, 21.0),
        (303, 1, 22.0),
    ];

    let dir_a = TempDir::new().unwrap();
    let collection_a = make_collection(dir_a.path());
    let mut writer_a = Writer::new(&collection_a);
    {
        let mut tx = WriteTransaction::new(&mut writer_a);
        for (ts, stream, value) in &writes {
            tx.write(*ts, *stream, *value);
        }
    }
    writer_a.flush_all();
    assert_eq!(writer_a.io_state(), IoState::Ok);

    let dir_b = TempDir::new().unwrap();
    let collection_b = make_collection(dir_b.path());
    let mut writer_b = Writer::new(&collection_b);
    {
        let mut tx = WriteTransaction::new(&mut writer_b);
        for (ts, stream, value) in &writes {
            tx.write(*ts, *stream, *value);
        }
    }
    // Many more bounded steps than the ladder needs; the extras must be
    // byte-level no-ops.
    for _ in 0..40 {
        writer_b.flush_some();
    }
    assert_eq!(writer_b.io_state(), IoState::Ok);

    assert_eq!(collect_tree(dir_a.path()), collect_tree(dir_b.path()));
}

#[test]
fn test_interrupted_flush_resumes_to_same_bytes() {
    let writes: Vec<(i64, u64, f32)> = (0..10).map(|i| (i, 1, i as f32)).collect();

    let dir_a = TempDir::new().unwrap();
    let collection_a = make_collection(dir_a.path());
    let mut writer_a = Writer::new(&collection_a);
    {
        let mut tx = WriteTransaction::new(&mut writer_a);
        for (ts, stream, value) in &writes {
            tx.write(*ts, *stream, *value);
        }
    }
    writer_a.flush_all();

    let dir_b = TempDir::new().unwrap();
    let collection_b = make_collection(dir_b.path());
    {
        let mut writer_b = Writer::new(&collection_b);
        {
            let mut tx = WriteTransaction::new(&mut writer_b);
            for (ts, stream, value) in &writes {
                tx.write(*ts, *stream, *value);
            }
        }
        // One bounded step only: the log reached the base vault file, but
        // the ladder above it never ran.
        writer_b.flush_some();
        assert!(writer_b.is_flush_in_progress());
    }

    // A fresh writer, as after a restart, finishes the job from the cursors.
    let mut writer_b = Writer::new(&collection_b);
    writer_b.flush_all();
    assert_eq!(writer_b.io_state(), IoState::Ok);

    assert_eq!(collect_tree(dir_a.path()), collect_tree(dir_b.path()));
}

#[test]
fn test_unreadable_cursor_triggers_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        for i in 0..5 {
            tx.write(i, 1, (10 * (i + 1)) as f32);
        }
    }
    writer.flush_all();

    let base = VaultFileRef::lookup(0, Resolution::MILLIS_1);
    fs::write(collection.cursor_file_path(base), [0xFFu8; 2]).unwrap();

    {
        let mut tx = WriteTransaction::new(&mut writer);
        tx.write(5, 1, 60.0);
    }
    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);

    let entries = read_entries(&collection, base);
    assert_eq!(entries.len(), 6);
    let transform = collection.transform();
    for (index, entry) in entries.iter().enumerate() {
        assert_eq!(entry.len(), 1);
        assert_eq!(
            entry[0].avg_value,
            transform.apply((10 * (index + 1)) as f32)
        );
    }
    assert_eq!(cursor_target(&collection, base), 6);
}

#[test]
fn test_flush_with_no_writes_is_a_no_op() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);
    assert!(!writer.is_flush_in_progress());
    assert!(!collection.log_dir().exists());
}

#[test]
fn test_iterator_reads_back_through_the_pyramid() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        for i in 0..8 {
            tx.write(i, 1, (i * 10) as f32);
        }
    }
    writer.flush_all();

    // At the parent resolution each bucket is 4 ms wide.
    let mut iter = VaultIterator::new(&collection, 0, Resolution::from_level(1));
    let mut samples = Vec::new();

    assert_eq!(iter.cursor(), 0);
    iter.next(&mut samples);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].stream_id, 1);
    assert_eq!(iter.cursor(), 4);

    iter.next(&mut samples);
    assert_eq!(samples.len(), 1);

    // Beyond the stored data the iterator keeps yielding empty buckets.
    iter.next(&mut samples);
    assert!(samples.is_empty());
}

#[test]
fn test_repeated_flush_all_is_stable() {
    let temp_dir = TempDir::new().unwrap();
    let collection = make_collection(temp_dir.path());
    let mut writer = Writer::new(&collection);

    {
        let mut tx = WriteTransaction::new(&mut writer);
        for i in 0..6 {
            tx.write(i, 1, i as f32);
        }
    }
    writer.flush_all();
    let tree_before = collect_tree(temp_dir.path());

    writer.flush_all();
    writer.flush_all();
    assert_eq!(writer.io_state(), IoState::Ok);
    assert_eq!(collect_tree(temp_dir.path()), tree_before);
}
