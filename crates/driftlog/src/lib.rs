//! Durable segmented write-ahead log.
//!
//! `driftlog` appends opaque byte payloads to an on-disk log, assigns each
//! a monotonically increasing logical index, and guarantees that any
//! record flushed to disk can be re-read bit-for-bit after a restart or
//! crash. Every record carries a CRC-32 checksum that is verified during
//! recovery, so on-disk corruption fails the open instead of surfacing
//! silently.
//!
//! The log is split across segment files named `<prefix>-NNNNNN.log`.
//! Appends land in an in-memory write buffer and reach the active segment
//! once the buffer crosses its threshold; the segment rotates once it
//! reaches its size threshold; rotation past the retained-segment cap
//! retires every segment and resets logical indices. An optional
//! background janitor retires segments older than a configured lifetime.
//!
//! # Example
//!
//! ```no_run
//! use driftlog::{Wal, WalOptions};
//!
//! fn main() -> driftlog::Result<()> {
//!     let wal = Wal::open(WalOptions::default().with_dir("./data/wal"))?;
//!     let index = wal.write(b"hello")?;
//!     assert_eq!(wal.read_index(index)?.data.as_ref(), b"hello");
//!     wal.iter(|index, record| {
//!         println!("{index}: {} bytes", record.length);
//!         true
//!     })?;
//!     wal.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Durability
//!
//! A successful [`Wal::write`] means the record is ordered and readable,
//! not that it is on disk. It becomes durable once a flush has completed:
//! implicitly when the write buffer crosses its threshold, or explicitly
//! via [`Wal::sync`] or [`Wal::close`].

pub mod config;
pub mod error;
pub mod janitor;
pub mod record;
pub mod wal;

mod buffer;
mod segment;

pub use config::{WalOptions, MAX_WRITE_BUFFER_CAP};
pub use error::{Error, Result};
pub use janitor::{default_janitor_hook, JanitorHook, RetiredSegment};
pub use record::{Record, RECORD_HEADER_SIZE};
pub use wal::Wal;
