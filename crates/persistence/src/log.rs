// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-only record log.
//!
//! ```text
//! [INDEX u64][PAYLOAD LEN u32][CRC64 u64][PAYLOAD]
//! ```
//! The checksum covers index, length and payload. A crash can leave a
//! partially written record at the tail; `LogWriter::open` cuts it off.
//! A bad record anywhere else is corruption and is reported.

use crate::error::{PersistenceError, Result};
use crate::encode_value;
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntryHeader {
    pub index: u64,
    pub payload_len: u32,
    pub checksum: u64,
}

impl LogEntryHeader {
    pub const SIZE: usize = 8 + 4 + 8; // 20 bytes

    pub fn for_payload(index: u64, payload: &[u8]) -> Self {
        Self {
            index,
            payload_len: payload.len() as u32,
            checksum: checksum(index, payload),
        }
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        Ok(Self {
            index: LittleEndian::read_u64(&buf[0..8]),
            payload_len: LittleEndian::read_u32(&buf[8..12]),
            checksum: LittleEndian::read_u64(&buf[12..20]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.index);
        LittleEndian::write_u32(&mut buf[8..12], self.payload_len);
        LittleEndian::write_u64(&mut buf[12..20], self.checksum);
        buf
    }
}

fn checksum(index: u64, payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&index.to_le_bytes());
    digest.write(&(payload.len() as u32).to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub header: LogEntryHeader,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        crate::decode_value(&self.payload)
    }
}

fn write_record<W: Write>(out: &mut W, index: u64, payload: &[u8]) -> Result<()> {
    let header = LogEntryHeader::for_payload(index, payload);
    out.write_all(&header.to_bytes())?;
    out.write_all(payload)?;
    Ok(())
}

/// One-shot append: open, write, fsync, close.
pub fn append_entry(path: impl AsRef<Path>, index: u64, payload: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    write_record(&mut file, index, payload)?;
    file.sync_data()?;
    Ok(())
}

/// Long-lived handle used by writers that append often.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    /// fsync after every append
    sync: bool,
}

impl LogWriter {
    /// Open (or create) the log and return its intact records.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<(Self, Vec<LogEntry>)> {
        let path = path.as_ref().to_path_buf();
        let (entries, valid_len) = if path.exists() { scan(&path)? } else { (Vec::new(), 0) };

        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        if file.metadata()?.len() != valid_len {
            file.set_len(valid_len)?;
            file.sync_data()?;
        }
        drop(file);

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok((Self { file, path, sync }, entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, index: u64, payload: &[u8]) -> Result<()> {
        write_record(&mut self.file, index, payload)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub fn append_value<T: Serialize>(&mut self, index: u64, value: &T) -> Result<()> {
        let payload = encode_value(value)?;
        self.append(index, &payload)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Replace the whole log with `records`, via a temp file and rename.
    pub fn rewrite<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = (u64, &'a [u8])>,
    {
        let tmp = self.path.with_extension("rewrite");
        {
            let mut out = File::create(&tmp)?;
            for (index, payload) in records {
                write_record(&mut out, index, payload)?;
            }
            out.sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

/// Read every intact record and the byte length of the intact prefix.
fn scan(path: &Path) -> Result<(Vec<LogEntry>, u64)> {
    let file_len = fs::metadata(path)?.len();
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut offset = 0u64;

    while offset < file_len {
        let header = match LogEntryHeader::read_from(&mut reader) {
            Ok(h) => h,
            Err(PersistenceError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let end = offset + LogEntryHeader::SIZE as u64 + header.payload_len as u64;
        if end > file_len {
            break;
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        reader.read_exact(&mut payload)?;

        let found = checksum(header.index, &payload);
        if found != header.checksum {
            if end == file_len {
                // torn final write
                break;
            }
            return Err(PersistenceError::ChecksumMismatch { expected: header.checksum, found });
        }

        entries.push(LogEntry { header, payload });
        offset = end;
    }

    Ok((entries, offset))
}

/// Streaming reader. Stops at a clean end of file; anything else is an error.
pub struct LogReader {
    reader: BufReader<File>,
}

impl LogReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { reader: BufReader::new(file) })
    }
}

impl Iterator for LogReader {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = match LogEntryHeader::read_from(&mut self.reader) {
            Ok(h) => h,
            Err(PersistenceError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e)),
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            return Some(Err(PersistenceError::IoError(e)));
        }

        let found = checksum(header.index, &payload);
        if found != header.checksum {
            return Some(Err(PersistenceError::ChecksumMismatch { expected: header.checksum, found }));
        }

        Some(Ok(LogEntry { header, payload }))
    }
}

pub fn read_stream(path: impl AsRef<Path>) -> Result<LogReader> {
    LogReader::new(path)
}
