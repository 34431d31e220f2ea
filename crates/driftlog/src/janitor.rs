//! Age-based segment retirement.
//!
//! When a lifetime is configured, a background thread watches the oldest
//! segment and retires it once its age exceeds the lifetime. Rotation
//! events that clear the segment list restart the wait against the new
//! oldest segment. The thread never mutates engine state itself; it goes
//! through the engine's retire entry point, which holds the write lock.

use crate::wal::WalShared;
use crossbeam_channel::{select, Receiver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// How long to idle when there is no segment to watch.
const IDLE_WAIT: Duration = Duration::from_secs(60 * 60);

/// A segment the janitor has detached from the engine. The engine has
/// already closed its handle and dropped it from the segment list; the
/// hook decides what happens to the file.
#[derive(Debug, Clone)]
pub struct RetiredSegment {
    pub index: u64,
    pub path: PathBuf,
    pub mod_time: SystemTime,
}

/// Retention action applied to a retired segment.
pub type JanitorHook = Arc<dyn Fn(&RetiredSegment) + Send + Sync>;

/// The default retention action: unlink the segment file. Failures are
/// logged and swallowed.
pub fn default_janitor_hook() -> JanitorHook {
    Arc::new(|segment: &RetiredSegment| {
        if let Err(err) = std::fs::remove_file(&segment.path) {
            warn!(
                path = %segment.path.display(),
                %err,
                "failed to remove retired segment"
            );
        }
    })
}

/// Messages from the engine to the janitor thread.
pub(crate) enum JanitorEvent {
    /// The segment list changed under a retention event; re-evaluate.
    Retained,
    /// The engine is closing.
    Shutdown,
}

pub(crate) fn run(shared: Arc<WalShared>, events: Receiver<JanitorEvent>) {
    let lifetime = Duration::from_secs(
        u64::from(shared.options.max_file_lifetime) * 24 * 60 * 60,
    );

    loop {
        let oldest = shared.oldest_segment();
        let wait = match oldest {
            Some((_, mod_time)) => (mod_time + lifetime)
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
            None => IDLE_WAIT,
        };

        select! {
            recv(events) -> event => match event {
                Ok(JanitorEvent::Retained) => continue,
                Ok(JanitorEvent::Shutdown) | Err(_) => break,
            },
            default(wait) => {
                if let Some((index, _)) = oldest {
                    debug!(segment = index, "segment lifetime elapsed");
                    shared.retire_oldest(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_hook_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal-000000.log");
        std::fs::write(&path, b"stale").unwrap();

        let hook = default_janitor_hook();
        hook(&RetiredSegment {
            index: 0,
            path: path.clone(),
            mod_time: SystemTime::now(),
        });

        assert!(!path.exists());
    }

    #[test]
    fn test_default_hook_swallows_missing_file() {
        let dir = TempDir::new().unwrap();
        let hook = default_janitor_hook();
        // Must not panic when the file is already gone.
        hook(&RetiredSegment {
            index: 1,
            path: dir.path().join("wal-000001.log"),
            mod_time: SystemTime::now(),
        });
    }
}
