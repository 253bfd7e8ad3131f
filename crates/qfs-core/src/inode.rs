//! In-memory inode records and the inode cache.
//!
//! [`Inode`] is the canonical in-memory form of a 40-byte on-disk
//! record. Loaded inodes live in the [`InodeCache`], keyed by number;
//! each cached slot carries its own mutex, which doubles as the
//! per-directory exclusive-access scope for table mutations.
//!
//! Handle accounting: the cache holds one `Arc` per slot, and every
//! [`InodeHandle`] given out by [`crate::QuicheFs::open`] holds
//! another. The eviction engine treats any reference beyond the
//! cache's own (and the scan's transient one) as "file in use" and
//! skips the candidate.

use parking_lot::Mutex;
use qfs_ondisk::{DiskInode, FileKind};
use qfs_types::{BlockNumber, InodeNumber};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Whole-second timestamp, saturating at the u32 horizon the on-disk
/// format imposes.
#[must_use]
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u32::try_from(d.as_secs()).ok())
        .unwrap_or(u32::MAX)
}

/// Canonical in-memory inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub ino: InodeNumber,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub ctime: u32,
    pub atime: u32,
    pub mtime: u32,
    /// Block count, including the index block.
    pub blocks: u32,
    pub nlink: u32,
    pub index_block: BlockNumber,
}

impl Inode {
    #[must_use]
    pub fn from_disk(ino: InodeNumber, disk: &DiskInode) -> Self {
        Self {
            ino,
            mode: disk.mode,
            uid: disk.uid,
            gid: disk.gid,
            size: disk.size,
            ctime: disk.ctime,
            atime: disk.atime,
            mtime: disk.mtime,
            blocks: disk.blocks,
            nlink: disk.nlink,
            index_block: disk.index_block(),
        }
    }

    #[must_use]
    pub fn to_disk(&self) -> DiskInode {
        DiskInode {
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size: self.size,
            ctime: self.ctime,
            atime: self.atime,
            mtime: self.mtime,
            blocks: self.blocks,
            nlink: self.nlink,
            index_block: self.index_block.0,
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.kind() == Some(FileKind::Regular)
    }

    /// Stamp all three times, as create/unlink do on the parent.
    pub fn touch(&mut self, now: u32) {
        self.ctime = now;
        self.atime = now;
        self.mtime = now;
    }

    /// Zero every field except the number, matching the on-disk scrub
    /// a destroyed inode receives.
    pub fn scrub(&mut self) {
        let ino = self.ino;
        *self = Self {
            ino,
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            ctime: 0,
            atime: 0,
            mtime: 0,
            blocks: 0,
            nlink: 0,
            index_block: BlockNumber(0),
        };
    }
}

/// One cached inode: the number plus its lock-guarded record.
#[derive(Debug)]
pub(crate) struct InodeSlot {
    pub(crate) ino: InodeNumber,
    pub(crate) meta: Mutex<Inode>,
}

/// An open handle to an inode.
///
/// Holding one pins the inode as "in use": the eviction engine will
/// not pick it as a victim while any handle is alive.
#[derive(Debug, Clone)]
pub struct InodeHandle(pub(crate) Arc<InodeSlot>);

impl InodeHandle {
    #[must_use]
    pub fn ino(&self) -> InodeNumber {
        self.0.ino
    }

    /// Snapshot of the record at this instant.
    #[must_use]
    pub fn record(&self) -> Inode {
        self.0.meta.lock().clone()
    }
}

/// Process-wide cache of loaded inodes.
#[derive(Debug, Default)]
pub(crate) struct InodeCache {
    slots: Mutex<HashMap<u32, Arc<InodeSlot>>>,
}

impl InodeCache {
    pub(crate) fn get(&self, ino: InodeNumber) -> Option<Arc<InodeSlot>> {
        self.slots.lock().get(&ino.0).cloned()
    }

    /// Install a record, returning the winning slot. If another
    /// thread installed the same inode first, its slot is kept and
    /// the new record is discarded.
    pub(crate) fn install(&self, record: Inode) -> Arc<InodeSlot> {
        let ino = record.ino;
        let mut slots = self.slots.lock();
        slots
            .entry(ino.0)
            .or_insert_with(|| {
                Arc::new(InodeSlot {
                    ino,
                    meta: Mutex::new(record),
                })
            })
            .clone()
    }

    pub(crate) fn evict(&self, ino: InodeNumber) {
        self.slots.lock().remove(&ino.0);
    }

    /// References to `slot` other than the cache's own and the
    /// caller's. Greater than zero means someone else holds the inode
    /// open.
    pub(crate) fn external_handles(slot: &Arc<InodeSlot>) -> usize {
        Arc::strong_count(slot).saturating_sub(2)
    }
}
