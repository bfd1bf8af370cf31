//! TCAR v1 wire format.
//!
//! ```text
//! varint(header_len) ‖ bincode{version, roots}
//! ( varint(section_len) ‖ cid_bytes ‖ block_bytes )*
//! ```
//!
//! Blocks are written parents-first so a reader can decode in a single pass.

use crate::archive::Archive;
use crate::error::{ArchiveError, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufReader, Cursor, ErrorKind, Read, Write};
use tessera_types::ContentId;

pub const CAR_VERSION: u64 = 1;
pub const MAX_HEADER_SIZE: u64 = 1 << 20;
pub const MAX_SECTION_SIZE: u64 = 64 << 20;

const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct CarHeader {
    version: u64,
    roots: Vec<ContentId>,
}

fn header_codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_HEADER_SIZE)
}

fn corrupt(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::CorruptArchive(msg.into())
}

/// Unsigned LEB128.
pub fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<usize> {
    let mut buf = [0u8; MAX_VARINT_BYTES];
    let mut n = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf[n] = byte;
            n += 1;
            break;
        }
        buf[n] = byte | 0x80;
        n += 1;
    }
    writer.write_all(&buf[..n])?;
    Ok(n)
}

/// Read an unsigned LEB128. `None` on a clean end of stream before the
/// first byte.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return if i == 0 {
                    Ok(None)
                } else {
                    Err(corrupt("truncated varint"))
                };
            }
            Err(e) => return Err(e.into()),
        }

        let low = (byte[0] & 0x7f) as u64;
        if i == MAX_VARINT_BYTES - 1 && low > 1 {
            return Err(corrupt("varint overflows 64 bits"));
        }
        value |= low << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(corrupt("malformed varint"))
}

fn read_section<R: Read>(reader: &mut R, len: u64, what: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => corrupt(format!("truncated {}", what)),
        _ => ArchiveError::Io(e),
    })?;
    Ok(buf)
}

/// Write an archive; returns the number of bytes written.
pub fn serialize_archive<W: Write>(archive: &Archive, mut writer: W) -> Result<u64> {
    let header = CarHeader {
        version: CAR_VERSION,
        roots: archive.roots().to_vec(),
    };
    let header_bytes = header_codec()
        .serialize(&header)
        .map_err(|e| ArchiveError::MalformedInput(format!("header encoding failed: {}", e)))?;

    let mut written = write_varint(&mut writer, header_bytes.len() as u64)? as u64;
    writer.write_all(&header_bytes)?;
    written += header_bytes.len() as u64;

    for cid in archive.stream_order()? {
        let Some(data) = archive.get(&cid) else {
            continue;
        };
        let cid_bytes = cid.to_bytes();
        let section_len = (cid_bytes.len() + data.len()) as u64;
        written += write_varint(&mut writer, section_len)? as u64;
        writer.write_all(&cid_bytes)?;
        writer.write_all(data)?;
        written += section_len;
    }
    writer.flush()?;
    Ok(written)
}

/// Parse and verify an archive. Every block is re-hashed; roots must be
/// present. Closure is not required, so partial DAGs parse.
pub fn parse_archive<R: Read>(reader: R) -> Result<Archive> {
    let mut reader = BufReader::new(reader);

    let header_len = read_varint(&mut reader)?.ok_or_else(|| corrupt("missing header"))?;
    if header_len == 0 || header_len > MAX_HEADER_SIZE {
        return Err(corrupt(format!("header length {} out of range", header_len)));
    }
    let header_bytes = read_section(&mut reader, header_len, "header")?;
    let header: CarHeader = header_codec()
        .deserialize(&header_bytes)
        .map_err(|e| corrupt(format!("undecodable header: {}", e)))?;
    if header.version != CAR_VERSION {
        return Err(corrupt(format!("unsupported archive version {}", header.version)));
    }
    if header.roots.is_empty() {
        return Err(corrupt("header declares no roots"));
    }

    let mut blocks = BTreeMap::new();
    while let Some(len) = read_varint(&mut reader)? {
        if len == 0 || len > MAX_SECTION_SIZE {
            return Err(corrupt(format!("section length {} out of range", len)));
        }
        let section = read_section(&mut reader, len, "section")?;
        let mut cursor = Cursor::new(section.as_slice());
        let cid = ContentId::read_from(&mut cursor).map_err(|e| corrupt(format!("bad section CID: {}", e)))?;
        let data = &section[cursor.position() as usize..];
        if !cid.verify_block(data) {
            return Err(corrupt(format!("block {} fails hash verification", cid)));
        }
        blocks.entry(cid).or_insert_with(|| data.to_vec());
    }

    if let Some(missing) = header.roots.iter().find(|r| !blocks.contains_key(*r)) {
        return Err(corrupt(format!("root {} missing", missing)));
    }
    Ok(Archive::from_parts(header.roots, blocks))
}

impl Archive {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.block_bytes() as usize + 64 * self.len() + 64);
        serialize_archive(self, &mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        parse_archive(bytes)
    }
}
