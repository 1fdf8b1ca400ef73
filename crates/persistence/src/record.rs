// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Single-record files, replaced atomically.
//!
//! ```text
//! [PAYLOAD LEN u32][CRC64 u64][PAYLOAD]
//! ```

use crate::error::{PersistenceError, Result};
use crate::{decode_value, encode_value};
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

const HEADER_LEN: usize = 4 + 8;

fn checksum(payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(payload);
    digest.sum64()
}

/// Write `value` to `path` through a temp file and rename.
pub fn store<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let payload = encode_value(value)?;

    let mut header = [0u8; HEADER_LEN];
    LittleEndian::write_u32(&mut header[0..4], payload.len() as u32);
    LittleEndian::write_u64(&mut header[4..12], checksum(&payload));

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&header)?;
        file.write_all(&payload)?;
        file.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the record at `path`. A missing file is `None`.
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }

    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() < HEADER_LEN {
        return Err(PersistenceError::InvalidFormat(format!(
            "record file {} is {} bytes",
            path.display(),
            bytes.len()
        )));
    }

    let len = LittleEndian::read_u32(&bytes[0..4]) as usize;
    let expected = LittleEndian::read_u64(&bytes[4..12]);
    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN + len)
        .ok_or_else(|| PersistenceError::InvalidFormat("record payload truncated".to_string()))?;

    let found = checksum(payload);
    if found != expected {
        return Err(PersistenceError::ChecksumMismatch { expected, found });
    }
    decode_value(payload).map(Some)
}
