//! Snapshot store — saves and rebuilds an [`IdentityTree`] from a binary
//! state file.
//!
//! Saves hold the tree lock for the whole encode-and-write and land on
//! disk atomically. Loads build a fresh tree and hand it out only when
//! every record and the checksum check out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::format::{self, Header, Record, HEADER_LEN};
use crate::config::TreeConfig;
use crate::error::{PhantomError, Result};
use crate::identity::Account;
use crate::quota::AdminQuota;
use crate::time;
use crate::tree::{IdentityTree, TraversalOrder};

/// Header fields and integrity status of a state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub version: u32,
    pub flags: u32,
    pub timestamp: i64,
    pub node_count: u64,
    pub checksum: u32,
    pub checksum_valid: bool,
    pub file_len: u64,
}

/// A state file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    // ── Public API ────────────────────────────────────────────────────────────

    /// Write every reachable node of `tree`, returning the node count.
    ///
    /// # Errors
    ///
    /// Returns `PhantomError::Io` if the file cannot be written, or
    /// `PhantomError::AllocationFailure` if the buffer cannot be sized.
    pub fn save(&self, tree: &IdentityTree) -> Result<u64> {
        let locked = tree.lock();
        let node_count = locked.size();

        let body_len = usize::try_from(node_count)
            .ok()
            .and_then(|n| n.checked_mul(format::RECORD_LEN_V2))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| PhantomError::AllocationFailure("snapshot too large".into()))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(body_len)
            .map_err(|e| PhantomError::AllocationFailure(format!("snapshot buffer: {e}")))?;

        buf.extend_from_slice(&Header::new(time::now_secs(), node_count).encode());
        let mut written = 0u64;
        locked.traverse(TraversalOrder::Dfs, |visit| {
            let record = Record {
                id: visit.id().clone(),
                parent_id: visit.parent.cloned(),
                creation_time: visit.node.creation_time(),
                roles: visit.roles,
                child_count: visit.child_count as u64,
            };
            record.encode_into(&mut buf);
            written += 1;
        });
        if written != node_count {
            return Err(PhantomError::CorruptState(format!(
                "tree reports {node_count} nodes but {written} are reachable"
            )));
        }

        let sum = format::checksum(&buf[HEADER_LEN..]);
        format::patch_checksum(&mut buf, sum);

        write_atomic(&self.path, &buf)?;
        drop(locked);

        log::info!(
            "saved {node_count} nodes to {} (checksum {sum:#010x})",
            self.path.display()
        );
        Ok(node_count)
    }

    /// Rebuild a tree from the state file.
    ///
    /// # Errors
    ///
    /// - `IncompatibleFormat` for a foreign magic, an unsupported version,
    ///   or reserved flag bits.
    /// - `CorruptState` for truncation, trailing bytes, malformed records,
    ///   records whose parent was not seen earlier, or a checksum mismatch.
    /// - `Io` if the file cannot be read.
    pub fn load(&self, config: TreeConfig, quota: Arc<AdminQuota>) -> Result<IdentityTree> {
        let bytes = std::fs::read(&self.path)?;
        let (header, records) = Self::decode(&bytes)?;

        let tree = IdentityTree::new(config, quota);
        for (i, record) in records.iter().enumerate() {
            let account = Account::restore(record.id.clone(), record.creation_time);
            tree.restore(&account, record.parent_id.as_ref(), record.roles)
                .map_err(|e| {
                    log::warn!("rejecting {}: record {i}: {e}", self.path.display());
                    PhantomError::CorruptState(format!("record {i}: {e}"))
                })?;
        }

        log::info!(
            "loaded {} nodes from {} (saved at {})",
            header.node_count,
            self.path.display(),
            time::secs_to_rfc3339(header.timestamp)
        );
        Ok(tree)
    }

    /// Read the header and check the record region without building a tree.
    pub fn inspect(&self) -> Result<SnapshotInfo> {
        let bytes = std::fs::read(&self.path)?;
        let header = Header::decode(&bytes)?;
        let body = &bytes[HEADER_LEN.min(bytes.len())..];
        Ok(SnapshotInfo {
            version: header.version,
            flags: header.flags,
            timestamp: header.timestamp,
            node_count: header.node_count,
            checksum: header.checksum,
            checksum_valid: format::checksum(body) == header.checksum,
            file_len: bytes.len() as u64,
        })
    }

    /// Decode every record in file order.
    pub fn read_records(&self) -> Result<Vec<Record>> {
        let bytes = std::fs::read(&self.path)?;
        Self::decode(&bytes).map(|(_, records)| records)
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn decode(bytes: &[u8]) -> Result<(Header, Vec<Record>)> {
        let header = Header::decode(bytes)?;
        header.check_compatible()?;
        let record_len = header.record_len()?;

        let body = &bytes[HEADER_LEN..];
        let expected = usize::try_from(header.node_count)
            .ok()
            .and_then(|n| n.checked_mul(record_len))
            .ok_or_else(|| {
                PhantomError::CorruptState(format!(
                    "node count {} is out of range",
                    header.node_count
                ))
            })?;
        if body.len() < expected {
            return Err(PhantomError::CorruptState(format!(
                "truncated: {} record bytes, expected {expected}",
                body.len()
            )));
        }
        if body.len() > expected {
            return Err(PhantomError::CorruptState(format!(
                "{} trailing bytes after {} records",
                body.len() - expected,
                header.node_count
            )));
        }

        let actual = format::checksum(body);
        if actual != header.checksum {
            return Err(PhantomError::CorruptState(format!(
                "checksum mismatch: header {:#010x}, computed {actual:#010x}",
                header.checksum
            )));
        }

        let records = body
            .chunks_exact(record_len)
            .map(|chunk| Record::decode(chunk, header.version))
            .collect::<Result<Vec<_>>>()?;
        Ok((header, records))
    }
}

/// Write `data` to `path` atomically using a sibling temporary file.
///
/// Creates the parent directory if it does not exist.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
