//! Marmot - Embedded Time Series Monitoring Store
//!
//! This crate provides a small, crash-safe store for numeric monitoring
//! data on devices writing to a block-oriented filesystem. Samples are
//! appended to a log and periodically flushed into a hierarchical vault: a
//! pyramid of fixed-size files holding min/avg/max aggregates at
//! resolutions from one millisecond up to years, ready for plotting at any
//! zoom level.
//!
//! # Components
//!
//! - [`Collection`]: a named store with a fixed base resolution and transform
//! - [`Writer`] / [`WriteTransaction`]: the append path and the flush engine
//! - [`VaultIterator`]: scanning stored data at a chosen resolution
//!
//! # Example
//!
//! ```rust,ignore
//! use marmot::{Collection, CollectionConfig, VaultIterator, WriteTransaction, Writer};
//!
//! let collection = Collection::new("/data", "sensors", CollectionConfig::default());
//! let mut writer = Writer::new(&collection);
//!
//! // Append samples; the transaction closes the log file on drop.
//! {
//!     let mut tx = WriteTransaction::new(&mut writer);
//!     tx.write(now_ms, stream_id, 21.5);
//! }
//!
//! // Move logged data into the vault, a bounded step at a time.
//! writer.flush_some();
//!
//! // Scan one week of data at ~17-minute buckets.
//! let mut iter = VaultIterator::new(&collection, start_ms, Resolution::from_level(10));
//! let mut samples = Vec::new();
//! iter.next(&mut samples);
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod collection;
pub mod error;
pub mod flush;
pub mod layout;
pub mod log;
pub mod resolution;
pub mod transform;
pub mod vault;

pub use collection::{Collection, CollectionConfig};
pub use error::{Result, Status, VaultError};
pub use flush::{IoState, WriteTransaction, Writer};
pub use log::LogSample;
pub use resolution::{Resolution, RANGE_ELEMENT_COUNT, RANGE_LENGTH};
pub use transform::Transform;
pub use vault::{Sample, VaultFileRef, VaultIterator, FULL_FILL};
