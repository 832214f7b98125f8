//! Storage layer for tree snapshots.
//!
//! # Modules
//!
//! - [`format`] — binary header/record layout and the rolling checksum.
//! - [`snapshot`] — [`SnapshotStore`]: atomic save, validated load, and
//!   offline inspection of a state file.

pub mod format;
pub mod snapshot;

pub use format::{Header, Record, FORMAT_VERSION, MAGIC};
pub use snapshot::{SnapshotInfo, SnapshotStore};
