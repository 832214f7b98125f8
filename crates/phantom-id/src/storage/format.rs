//! Binary snapshot layout.
//!
//! All integers are little-endian. A file is a fixed header followed by
//! `node_count` fixed-size records in depth-first pre-order, so every
//! parent record precedes its children.
//!
//! ```text
//! Header (32 bytes):
//!   magic          u32   0x50484944 ("PHID")
//!   version        u32
//!   flags          u32   bit 0 compressed, bit 1 encrypted (reserved)
//!   timestamp      i64   seconds since epoch at save time
//!   node_count     u64
//!   checksum       u32   over the record region only
//!
//! Record (v2: 147 bytes, v1: 146 bytes):
//!   id             [u8; 64]  hex text, NUL-padded
//!   parent_id      [u8; 64]  hex text, NUL-padded, empty for tops
//!   creation_time  i64
//!   is_root        u8
//!   is_active      u8
//!   child_count    u64
//!   is_admin       u8        v2 only
//! ```

use crate::error::{PhantomError, Result};
use crate::identity::{NodeId, NODE_ID_LEN};
use crate::tree::NodeRoles;

// ── Format constants ──────────────────────────────────────────────────────────

pub const MAGIC: u32 = 0x5048_4944;

/// Version written by `save`.
pub const FORMAT_VERSION: u32 = 2;

/// Oldest version `load` still reads.
pub const MIN_FORMAT_VERSION: u32 = 1;

pub const HEADER_LEN: usize = 32;

pub const RECORD_LEN_V1: usize = 146;
pub const RECORD_LEN_V2: usize = 147;

pub const FLAG_COMPRESSED: u32 = 1 << 0;
pub const FLAG_ENCRYPTED: u32 = 1 << 1;

/// Chunk size of the rolling checksum.
pub const CHECKSUM_CHUNK: usize = 4096;

/// Byte offset of the checksum field inside the header.
const CHECKSUM_OFFSET: usize = 28;

/// Record size for a format version.
pub fn record_len(version: u32) -> Result<usize> {
    match version {
        1 => Ok(RECORD_LEN_V1),
        2 => Ok(RECORD_LEN_V2),
        v => Err(PhantomError::IncompatibleFormat(format!(
            "unsupported format version {v} (supported {MIN_FORMAT_VERSION}..={FORMAT_VERSION})"
        ))),
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub timestamp: i64,
    pub node_count: u64,
    pub checksum: u32,
}

impl Header {
    pub fn new(timestamp: i64, node_count: u64) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            timestamp,
            node_count,
            checksum: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.to_le_bytes());
        out[12..20].copy_from_slice(&self.timestamp.to_le_bytes());
        out[20..28].copy_from_slice(&self.node_count.to_le_bytes());
        out[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Parse the first `HEADER_LEN` bytes of `bytes`. Only the length is
    /// checked here; see [`Header::check_compatible`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let header = Self {
            magic: reader.u32()?,
            version: reader.u32()?,
            flags: reader.u32()?,
            timestamp: reader.i64()?,
            node_count: reader.u64()?,
            checksum: reader.u32()?,
        };
        Ok(header)
    }

    /// Reject files this build cannot interpret.
    pub fn check_compatible(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(PhantomError::IncompatibleFormat(format!(
                "bad magic {:#010x}",
                self.magic
            )));
        }
        record_len(self.version)?;
        if self.flags & (FLAG_COMPRESSED | FLAG_ENCRYPTED) != 0 {
            return Err(PhantomError::IncompatibleFormat(format!(
                "unsupported flags {:#x}",
                self.flags
            )));
        }
        Ok(())
    }

    pub fn record_len(&self) -> Result<usize> {
        record_len(self.version)
    }
}

/// Overwrite the checksum field of an encoded header.
pub fn patch_checksum(buf: &mut [u8], checksum: u32) {
    buf[CHECKSUM_OFFSET..HEADER_LEN].copy_from_slice(&checksum.to_le_bytes());
}

// ── Records ───────────────────────────────────────────────────────────────────

/// One node as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub creation_time: i64,
    pub roles: NodeRoles,
    pub child_count: u64,
}

impl Record {
    /// Append the current-version encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.id.as_bytes());
        match &self.parent_id {
            Some(parent) => out.extend_from_slice(parent.as_bytes()),
            None => out.extend_from_slice(&[0u8; NODE_ID_LEN]),
        }
        out.extend_from_slice(&self.creation_time.to_le_bytes());
        out.push(u8::from(self.roles.is_root));
        out.push(u8::from(self.roles.is_active));
        out.extend_from_slice(&self.child_count.to_le_bytes());
        out.push(u8::from(self.roles.is_admin));
    }

    /// Decode one record of `version` from exactly `record_len(version)` bytes.
    pub fn decode(bytes: &[u8], version: u32) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let id = id_field(reader.take(NODE_ID_LEN)?)?
            .ok_or_else(|| PhantomError::CorruptState("record with empty id".into()))?;
        let parent_id = id_field(reader.take(NODE_ID_LEN)?)?;
        let creation_time = reader.i64()?;
        let is_root = reader.flag("is_root")?;
        let is_active = reader.flag("is_active")?;
        let child_count = reader.u64()?;
        let is_admin = if version >= 2 {
            reader.flag("is_admin")?
        } else {
            is_root
        };
        Ok(Self {
            id,
            parent_id,
            creation_time,
            roles: NodeRoles {
                is_root,
                is_admin,
                is_active,
            },
            child_count,
        })
    }
}

/// Parse a NUL-padded identifier field. All-NUL means absent.
fn id_field(raw: &[u8]) -> Result<Option<NodeId>> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    if raw[end..].iter().any(|b| *b != 0) {
        return Err(PhantomError::CorruptState(
            "identifier field has bytes after its terminator".into(),
        ));
    }
    if end == 0 {
        return Ok(None);
    }
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|_| PhantomError::CorruptState("identifier is not text".into()))?;
    NodeId::parse(text)
        .map(Some)
        .map_err(|e| PhantomError::CorruptState(e.to_string()))
}

// ── Checksum ──────────────────────────────────────────────────────────────────

/// Rolling multiply-add hash over `data`.
///
/// Each `CHECKSUM_CHUNK`-byte chunk is hashed from zero with
/// `h = h * 33 + byte`; the chunk hashes are XORed together.
pub fn checksum(data: &[u8]) -> u32 {
    data.chunks(CHECKSUM_CHUNK)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0u32, |h, b| h.wrapping_mul(33).wrapping_add(u32::from(*b)))
        })
        .fold(0, |acc, h| acc ^ h)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| PhantomError::CorruptState("unexpected end of snapshot".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn flag(&mut self, field: &str) -> Result<bool> {
        match self.array::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(PhantomError::CorruptState(format!(
                "{field} byte must be 0 or 1, got {b}"
            ))),
        }
    }
}
