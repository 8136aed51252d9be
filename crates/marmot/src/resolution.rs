//! Time resolutions expressed as powers of four of milliseconds.
//!
//! A resolution level `r` denotes a bucket width of `4^r` ms. Level 0 is
//! 1 ms, level 5 is about one second, and level 18, the coarsest supported,
//! is about 2.18 years. Because the base is a power of two, flooring and
//! ceiling a timestamp at a resolution are plain bit masks over the low
//! `2r` bits.

/// Levels between a vault file's resolution and the resolution of its whole
/// time span: a file holds `4^RANGE_LENGTH` entries.
pub const RANGE_LENGTH: u8 = 4;

/// Entries held by a complete vault file (`4^RANGE_LENGTH`).
pub const RANGE_ELEMENT_COUNT: usize = 1 << (RANGE_LENGTH << 1);

/// A bucket width of `4^level` milliseconds, with `level` in `[0, 18]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resolution(u8);

impl Resolution {
    /// 1 ms buckets.
    pub const MILLIS_1: Resolution = Resolution(0);
    /// 1024 ms buckets, about one second; the default writer resolution.
    pub const MILLIS_1024: Resolution = Resolution(5);
    /// 65536 ms buckets, about one minute.
    pub const MILLIS_65536: Resolution = Resolution(8);
    /// The coarsest supported resolution, about 2.18 years per bucket.
    pub const MAX: Resolution = Resolution(18);

    /// Creates a resolution from its level.
    ///
    /// Levels above [`Resolution::MAX`] are representable so that derived
    /// grouping resolutions (level + 8) keep working; the flush machinery
    /// guards the compaction ladder against exceeding `MAX`.
    pub fn from_level(level: u8) -> Resolution {
        debug_assert!(level <= Resolution::MAX.0 + RANGE_LENGTH + 4);
        Resolution(level)
    }

    /// Returns the level, the exponent over base four.
    pub fn level(self) -> u8 {
        self.0
    }

    /// Returns the bucket width in milliseconds.
    pub fn bucket_millis(self) -> i64 {
        1i64 << (self.0 << 1)
    }

    /// Rounds a timestamp down to the start of its bucket.
    pub fn floor(self, timestamp_ms: i64) -> i64 {
        timestamp_ms & (!0i64 << (self.0 << 1))
    }

    /// Rounds a timestamp up to the last millisecond of its bucket.
    pub fn ceil(self, timestamp_ms: i64) -> i64 {
        timestamp_ms | !(!0i64 << (self.0 << 1))
    }

    /// Returns the time span of `steps` buckets in milliseconds.
    pub fn steps(self, steps: i64) -> i64 {
        steps << (self.0 << 1)
    }

    /// The next coarser resolution (one level up the pyramid).
    pub fn coarser(self) -> Resolution {
        Resolution(self.0 + 1)
    }

    /// The next finer resolution (one level down the pyramid).
    pub fn finer(self) -> Resolution {
        Resolution(self.0 - 1)
    }

    /// The resolution spanning one whole file at this resolution.
    pub fn range(self) -> Resolution {
        Resolution(self.0 + RANGE_LENGTH)
    }

    /// The resolution spanning one grouping directory of 256 files.
    pub fn group(self) -> Resolution {
        Resolution(self.0 + RANGE_LENGTH + 4)
    }
}
