//! Engine configuration.

use crate::janitor::{default_janitor_hook, JanitorHook};
use std::fmt;
use std::path::PathBuf;

/// Hard ceiling for the in-memory write buffer.
pub const MAX_WRITE_BUFFER_CAP: usize = 64 * 1024;

/// Configuration for a [`Wal`](crate::Wal).
///
/// Built with chainable `with_*` setters:
///
/// ```no_run
/// use driftlog::WalOptions;
///
/// let options = WalOptions::default()
///     .with_dir("./data/wal")
///     .with_max_segment_size(5 * 1024 * 1024)
///     .with_max_segment_file(5);
/// ```
#[derive(Clone)]
pub struct WalOptions {
    /// Directory holding the segment files.
    pub dir: PathBuf,

    /// Segment filename prefix.
    pub prefix: String,

    /// Rotate once the active segment's logical size reaches this many bytes.
    pub max_segment_size: u64,

    /// Maximum number of concurrently retained segments. Exceeding it on
    /// rotation retires every existing segment and resets logical indices.
    /// `0` disables the cap.
    pub max_segment_file: usize,

    /// Flush the write buffer once it holds this many bytes. Capped at
    /// [`MAX_WRITE_BUFFER_CAP`].
    pub max_write_buffer_size: usize,

    /// Number of decoded records held by the read cache. Must be non-zero.
    pub cache_size: usize,

    /// Segment lifetime in days enforced by the janitor. `0` disables the
    /// janitor.
    pub max_file_lifetime: u32,

    /// Action applied to a segment the janitor has retired.
    pub janitor_hook: JanitorHook,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./wal"),
            prefix: "wal".to_string(),
            max_segment_size: 20 * 1024 * 1024,
            max_segment_file: 10,
            max_write_buffer_size: 32 * 1024,
            cache_size: 1024,
            max_file_lifetime: 0,
            janitor_hook: default_janitor_hook(),
        }
    }
}

impl WalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_max_segment_size(mut self, bytes: u64) -> Self {
        self.max_segment_size = bytes;
        self
    }

    pub fn with_max_segment_file(mut self, count: usize) -> Self {
        self.max_segment_file = count;
        self
    }

    /// Values above [`MAX_WRITE_BUFFER_CAP`] are clamped to the cap.
    pub fn with_max_write_buffer_size(mut self, bytes: usize) -> Self {
        self.max_write_buffer_size = bytes.min(MAX_WRITE_BUFFER_CAP);
        self
    }

    pub fn with_cache_size(mut self, entries: usize) -> Self {
        self.cache_size = entries;
        self
    }

    pub fn with_max_file_lifetime(mut self, days: u32) -> Self {
        self.max_file_lifetime = days;
        self
    }

    pub fn with_janitor_hook(mut self, hook: JanitorHook) -> Self {
        self.janitor_hook = hook;
        self
    }
}

impl fmt::Debug for WalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalOptions")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .field("max_segment_size", &self.max_segment_size)
            .field("max_segment_file", &self.max_segment_file)
            .field("max_write_buffer_size", &self.max_write_buffer_size)
            .field("cache_size", &self.cache_size)
            .field("max_file_lifetime", &self.max_file_lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = WalOptions::default();
        assert_eq!(options.dir, PathBuf::from("./wal"));
        assert_eq!(options.prefix, "wal");
        assert_eq!(options.max_segment_size, 20 * 1024 * 1024);
        assert_eq!(options.max_segment_file, 10);
        assert_eq!(options.max_write_buffer_size, 32 * 1024);
        assert_eq!(options.cache_size, 1024);
        assert_eq!(options.max_file_lifetime, 0);
    }

    #[test]
    fn test_builder_chain() {
        let options = WalOptions::new()
            .with_dir("/var/log/app")
            .with_prefix("events")
            .with_max_segment_size(1024)
            .with_max_segment_file(3)
            .with_cache_size(16)
            .with_max_file_lifetime(7);

        assert_eq!(options.dir, PathBuf::from("/var/log/app"));
        assert_eq!(options.prefix, "events");
        assert_eq!(options.max_segment_size, 1024);
        assert_eq!(options.max_segment_file, 3);
        assert_eq!(options.cache_size, 16);
        assert_eq!(options.max_file_lifetime, 7);
    }

    #[test]
    fn test_write_buffer_size_is_capped() {
        let options = WalOptions::new().with_max_write_buffer_size(1024 * 1024);
        assert_eq!(options.max_write_buffer_size, MAX_WRITE_BUFFER_CAP);

        let options = WalOptions::new().with_max_write_buffer_size(4 * 1024);
        assert_eq!(options.max_write_buffer_size, 4 * 1024);
    }
}
