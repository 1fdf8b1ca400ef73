// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Snapshot files.
//!
//! ```text
//! [MAGIC "NTSN"][VERSION u32][LAST INDEX u64][LAST TERM u64][CRC64 u64][RESERVED 16B][BODY]
//! ```
//! BODY is an encoded commit-log state (see `notary_kernel::snapshot`),
//! which carries its own state hash. The CRC64 here guards the file.

use crate::error::{PersistenceError, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use notary_kernel::snapshot::{decode_state, encode_state};
use notary_kernel::CommitLogState;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u32,
    /// Log position the snapshot covers up to and including.
    pub last_index: u64,
    pub last_term: u64,
    pub checksum: u64,
    pub reserved: [u8; 16],
}

impl SnapshotHeader {
    pub const SIZE: usize = 4 + 4 + 8 + 8 + 8 + 16; // 48 bytes
    pub const MAGIC: [u8; 4] = *b"NTSN";
    pub const VERSION: u32 = 1;

    pub fn new(last_index: u64, last_term: u64, body: &[u8]) -> Self {
        let mut digest = Digest::new();
        digest.write(body);
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            last_index,
            last_term,
            checksum: digest.sum64(),
            reserved: [0; 16],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.version);
        LittleEndian::write_u64(&mut buf[8..16], self.last_index);
        LittleEndian::write_u64(&mut buf[16..24], self.last_term);
        LittleEndian::write_u64(&mut buf[24..32], self.checksum);
        buf[32..48].copy_from_slice(&self.reserved);
        buf
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != Self::MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        if version != Self::VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }
        let mut reserved = [0u8; 16];
        reserved.copy_from_slice(&buf[32..48]);

        Ok(Self {
            magic,
            version,
            last_index: LittleEndian::read_u64(&buf[8..16]),
            last_term: LittleEndian::read_u64(&buf[16..24]),
            checksum: LittleEndian::read_u64(&buf[24..32]),
            reserved,
        })
    }
}

/// Write header and body through a temp file and rename.
pub fn write_to(path: impl AsRef<Path>, header: &SnapshotHeader, body: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(body)?;
        file.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and verify a snapshot file.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<(SnapshotHeader, Vec<u8>)> {
    let mut file = File::open(path)?;
    let header = SnapshotHeader::read_from(&mut file)?;
    let mut body = Vec::new();
    file.read_to_end(&mut body)?;

    let mut digest = Digest::new();
    digest.write(&body);
    let found = digest.sum64();
    if found != header.checksum {
        return Err(PersistenceError::ChecksumMismatch { expected: header.checksum, found });
    }
    Ok((header, body))
}

pub fn save_state(
    path: impl AsRef<Path>,
    state: &CommitLogState,
    last_index: u64,
    last_term: u64,
) -> Result<SnapshotHeader> {
    let body = encode_state(state)?;
    let header = SnapshotHeader::new(last_index, last_term, &body);
    write_to(path, &header, &body)?;
    Ok(header)
}

/// Load a state snapshot. A missing file is `None`.
pub fn load_state(path: impl AsRef<Path>) -> Result<Option<(SnapshotHeader, CommitLogState)>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let (header, body) = read_snapshot(path)?;
    let state = decode_state(&body)?;
    Ok(Some((header, state)))
}
