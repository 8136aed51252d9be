//! A named collection of streams sharing one resolution and transform.

use crate::layout;
use crate::resolution::Resolution;
use crate::transform::Transform;
use crate::vault::VaultFileRef;
use std::path::{Path, PathBuf};

/// Tunables of a collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectionConfig {
    /// Base resolution at which samples are logged.
    pub resolution: Resolution,
    /// Quantizer applied to every written value.
    pub transform: Transform,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            resolution: Resolution::MILLIS_1024,
            transform: Transform::default(),
        }
    }
}

/// A named store of time series that are usually plotted together.
///
/// A collection owns no file handles; it is the naming authority for the
/// directory tree below `<base_dir>/<name>`:
///
/// ```text
/// <base_dir>/<name>/log/<stamp>                 log files
/// <base_dir>/<name>/vault-RR/<stamp>/<stamp>    vault files per resolution
/// <base_dir>/<name>/vault-RR/<stamp>/<stamp>.cursor
/// ```
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    base_dir: PathBuf,
    resolution: Resolution,
    transform: Transform,
}

impl Collection {
    /// Creates a collection rooted at `base_dir`.
    ///
    /// Nothing is touched on disk; directories appear lazily as files are
    /// written.
    pub fn new(base_dir: impl AsRef<Path>, name: impl Into<String>, config: CollectionConfig) -> Self {
        let name = name.into();
        let base_dir = base_dir.as_ref().join(&name);
        Collection {
            name,
            base_dir,
            resolution: config.resolution,
            transform: config.transform,
        }
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the base resolution at which samples are logged.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Returns the transform applied to written values.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Returns the directory holding the collection's log files.
    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join("log")
    }

    /// Returns the path of the vault file identified by `ref_`.
    ///
    /// Files are grouped into second-level directories of at most 256
    /// entries, stamped with the timestamp floored at the grouping
    /// resolution.
    pub fn vault_file_path(&self, ref_: VaultFileRef) -> PathBuf {
        let group = ref_.resolution().group();
        let dir_stamp = layout::stamp(group.floor(ref_.timestamp()));
        self.base_dir
            .join(format!("vault-{:02X}", ref_.resolution().level()))
            .join(dir_stamp)
            .join(layout::stamp(ref_.timestamp()))
    }

    /// Returns the path of the compaction cursor sidecar for `ref_`.
    pub fn cursor_file_path(&self, ref_: VaultFileRef) -> PathBuf {
        let mut path = self.vault_file_path(ref_).into_os_string();
        path.push(".cursor");
        PathBuf::from(path)
    }
}
