#![forbid(unsafe_code)]
//! QuicheFS core: inode and directory lifecycle plus the eviction
//! engine.
//!
//! The defining constraint of this filesystem is fixed-capacity
//! metadata: a directory table holds at most
//! [`qfs_types::MAX_SUBFILES`] entries and a file at most
//! [`qfs_types::MAX_FILE_BLOCKS`] data blocks. When a create hits a
//! full directory, the filesystem reclaims space on its own by
//! deleting one regular file, chosen by the installed
//! [`EvictionPolicy`], before the create proceeds.
//!
//! Module map:
//! - [`inode`]: in-memory inode records and the inode cache
//! - [`dir`]: directory-table operations (lookup/insert/remove/rename)
//! - [`evict`]: victim search and the swappable eviction policy
//! - [`fs`]: the [`QuicheFs`] facade for mount, sync, inode lifecycle
//! - [`mkfs`]: image formatting
//!
//! Nothing here is crash-consistent: the format has no journal, and a
//! crash in the middle of a multi-step operation (create, unlink,
//! rename) can leave metadata inconsistent. Locking is per-inode and
//! covers each table read-modify-write; operations touching several
//! inodes acquire their locks in ascending inode-number order.

pub mod dir;
pub mod evict;
pub mod fs;
pub mod inode;
pub mod mkfs;

pub use evict::{policy_by_name, EvictionPolicy, LargestSize, OldestMtime, PolicySlot};
pub use fs::{DirEntryInfo, QuicheFs, RenameFlags, Stat};
pub use inode::{Inode, InodeHandle};
pub use mkfs::mkfs;
