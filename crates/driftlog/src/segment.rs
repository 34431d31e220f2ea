//! On-disk segments.
//!
//! A segment is one `<prefix>-NNNNNN.log` file holding a contiguous run of
//! framed records. The active segment (highest index) keeps a buffered
//! writer open; every other segment is closed and is reopened transiently
//! for reads.

use crate::error::{Error, Result};
use crate::record::{self, Record, RECORD_HEADER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const SEGMENT_EXT: &str = "log";
const WRITER_BUFFER_SIZE: usize = 8 * 1024;

/// Location of one record inside its segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordPos {
    /// Byte offset of the record header within the segment.
    pub offset: u64,
    /// Payload length in bytes.
    pub length: u32,
}

impl RecordPos {
    /// Byte offset one past the end of the record's frame.
    pub fn frame_end(&self) -> u64 {
        self.offset + RECORD_HEADER_SIZE as u64 + self.length as u64
    }
}

#[derive(Debug)]
pub(crate) struct Segment {
    /// Monotonic index parsed from (or used to build) the filename.
    pub index: u64,
    pub path: PathBuf,
    /// Logical byte length, including records still in the write buffer.
    pub size: u64,
    /// Bytes known to have been fsynced.
    pub durable_size: u64,
    /// Last durable modification time.
    pub mod_time: SystemTime,
    /// One entry per record, in append order.
    pub positions: Vec<RecordPos>,
    writer: Option<BufWriter<File>>,
}

/// Build the on-disk path for a segment index.
pub(crate) fn segment_path(dir: &Path, prefix: &str, index: u64) -> PathBuf {
    dir.join(format!("{prefix}-{index:06}.{SEGMENT_EXT}"))
}

/// Parse the trailing `-NNNNNN` index out of a segment filename.
pub(crate) fn parse_segment_index(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

/// Whether a directory entry looks like a segment file.
pub(crate) fn is_segment_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == SEGMENT_EXT)
}

impl Segment {
    /// Create a fresh, empty segment and leave it open for appends.
    pub fn create(dir: &Path, prefix: &str, index: u64) -> Result<Self> {
        let path = segment_path(dir, prefix, index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        Ok(Self {
            index,
            path,
            size: 0,
            durable_size: 0,
            mod_time: SystemTime::now(),
            positions: Vec::new(),
            writer: Some(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file)),
        })
    }

    /// Rebuild a segment from an existing file, verifying every record's
    /// checksum. The segment is left closed.
    pub fn recover(path: PathBuf, index: u64) -> Result<Self> {
        let file = File::open(&path)?;
        let mod_time = file.metadata()?.modified()?;

        let mut positions = Vec::new();
        let mut offset = 0u64;
        let mut reader = BufReader::new(file);
        loop {
            let record = match record::read_record(&mut reader) {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(Error::Corruption(reason)) => {
                    return Err(Error::Corruption(format!(
                        "{reason} at offset {offset} in {}",
                        path.display()
                    )));
                }
                Err(err) => return Err(err),
            };
            if !record.crc_valid() {
                return Err(Error::Corruption(format!(
                    "checksum mismatch at offset {offset} in {}",
                    path.display()
                )));
            }
            positions.push(RecordPos {
                offset,
                length: record.length,
            });
            offset += record.frame_len();
        }

        Ok(Self {
            index,
            path,
            size: offset,
            durable_size: offset,
            mod_time,
            positions,
            writer: None,
        })
    }

    /// A closed segment has no open write handle.
    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub fn record_count(&self) -> usize {
        self.positions.len()
    }

    /// Whether the record at `local` still lives in the write buffer
    /// rather than in the file.
    pub fn on_active_buffer(&self, local: usize) -> bool {
        !self.is_closed() && self.positions[local].offset >= self.durable_size
    }

    pub fn writer_mut(&mut self) -> Option<&mut BufWriter<File>> {
        self.writer.as_mut()
    }

    /// Flush the writer, fsync the file, and refresh `durable_size` and
    /// `mod_time` from the file metadata.
    pub fn sync(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(Error::closed)?;
        writer.flush()?;

        let file = writer.get_ref();
        file.sync_all()?;
        let metadata = file.metadata()?;
        self.durable_size = metadata.len();
        self.mod_time = metadata.modified()?;
        Ok(())
    }

    /// Flush and drop the write handle, marking the segment closed.
    pub fn close_writer(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Read the record at `offset`, opening the file for the duration of
    /// the read only.
    pub fn read_at(&self, offset: u64) -> Result<Record> {
        let file = File::open(&self.path)?;
        read_record_at(&file, offset)
    }
}

/// Seek `file` to `offset` and decode one record.
pub(crate) fn read_record_at(file: &File, offset: u64) -> Result<Record> {
    let mut handle = file;
    handle.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(handle);
    match record::read_record(&mut reader)? {
        Some(record) => Ok(record),
        None => Err(Error::Corruption(format!(
            "no record at offset {offset}"
        ))),
    }
}
