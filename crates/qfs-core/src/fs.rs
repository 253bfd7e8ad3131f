//! The mounted-filesystem facade and the inode lifecycle manager.
//!
//! [`QuicheFs`] owns the device, the superblock geometry, the bitmap
//! allocator, the inode cache, and the active eviction policy. The
//! directory operations live in [`crate::dir`], the reclamation
//! engine in [`crate::evict`]; both are `impl QuicheFs` blocks so the
//! whole operation surface hangs off one type.

use crate::evict::PolicySlot;
use crate::inode::{unix_now, Inode, InodeCache, InodeHandle, InodeSlot};
use qfs_alloc::BitmapAllocator;
use qfs_block::{BlockBuf, BlockDevice};
use qfs_error::{QfsError, Result};
use qfs_ondisk::{DirBlock, DiskInode, FileKind, IndexBlock, SuperBlock};
use qfs_types::{
    BlockNumber, InodeNumber, ParseError, BLOCK_SIZE, FILENAME_LEN, MAX_FILE_BLOCKS, ROOT_INO,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Convert a codec failure into the user-facing error.
pub(crate) fn parse_err(err: ParseError) -> QfsError {
    QfsError::Parse(err.to_string())
}

/// Flags accepted by [`QuicheFs::rename_entry`]. Both variants are
/// rejected with `Unsupported`; they exist so callers can express the
/// request and get the documented refusal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameFlags {
    pub exchange: bool,
    pub whiteout: bool,
}

/// Point-in-time metadata snapshot for one inode.
#[derive(Debug, Clone, Serialize)]
pub struct Stat {
    pub ino: u32,
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub nlink: u32,
    pub blocks: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// One directory listing row.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub ino: u32,
}

/// A mounted QuicheFS filesystem.
pub struct QuicheFs {
    dev: Arc<dyn BlockDevice>,
    sb: SuperBlock,
    alloc: Mutex<BitmapAllocator>,
    cache: InodeCache,
    policy: PolicySlot,
}

impl QuicheFs {
    /// Mount a formatted device: validate the superblock, load the
    /// bitmaps, and load the root directory inode.
    pub fn mount(dev: Arc<dyn BlockDevice>) -> Result<Self> {
        if dev.block_size() as usize != BLOCK_SIZE {
            return Err(QfsError::Format(format!(
                "unsupported block size {} (need {BLOCK_SIZE})",
                dev.block_size()
            )));
        }

        let buf = dev.read_block(BlockNumber(0))?;
        // Mount-time decode failures are format errors, not live
        // corruption: the image is simply not a QuicheFS image.
        let sb = SuperBlock::parse_from_block(buf.as_slice())
            .map_err(|err| QfsError::Format(err.to_string()))?;
        if !sb.geometry_fits(dev.block_count()) {
            return Err(QfsError::Format(format!(
                "superblock geometry exceeds device: nr_blocks={} device={}",
                sb.nr_blocks,
                dev.block_count()
            )));
        }

        let alloc = BitmapAllocator::load(&sb, dev.as_ref())?;
        debug!(
            nr_blocks = sb.nr_blocks,
            nr_inodes = sb.nr_inodes,
            free_blocks = alloc.nr_free_blocks(),
            free_inodes = alloc.nr_free_inodes(),
            "mounted"
        );

        let fs = Self {
            dev,
            sb,
            alloc: Mutex::new(alloc),
            cache: InodeCache::default(),
            policy: PolicySlot::default(),
        };

        let root = fs.iget(ROOT_INO)?;
        if !root.meta.lock().is_dir() {
            return Err(QfsError::Format("root inode is not a directory".to_owned()));
        }
        Ok(fs)
    }

    /// Superblock geometry with live free counters.
    #[must_use]
    pub fn superblock(&self) -> SuperBlock {
        let alloc = self.alloc.lock();
        let mut sb = self.sb.clone();
        sb.nr_free_inodes = alloc.nr_free_inodes();
        sb.nr_free_blocks = alloc.nr_free_blocks();
        sb
    }

    pub(crate) fn policy(&self) -> &PolicySlot {
        &self.policy
    }

    /// Write the superblock (with current free counters) and the
    /// bitmaps back to the device, then flush it.
    pub fn sync(&self) -> Result<()> {
        let alloc = self.alloc.lock();
        let mut sb = self.sb.clone();
        sb.nr_free_inodes = alloc.nr_free_inodes();
        sb.nr_free_blocks = alloc.nr_free_blocks();

        let mut buf = BlockBuf::zeroed(BLOCK_SIZE);
        sb.encode_into(buf.as_mut_slice()).map_err(parse_err)?;
        self.dev.write_block(BlockNumber(0), buf.as_slice())?;
        alloc.flush(&self.sb, self.dev.as_ref())?;
        drop(alloc);
        self.dev.sync()
    }

    /// Open a handle, pinning the inode against eviction.
    pub fn open(&self, ino: InodeNumber) -> Result<InodeHandle> {
        Ok(InodeHandle(self.iget(ino)?))
    }

    /// Metadata snapshot for one inode.
    pub fn stat(&self, ino: InodeNumber) -> Result<Stat> {
        let slot = self.iget(ino)?;
        let meta = slot.meta.lock();
        let kind = meta
            .kind()
            .ok_or(QfsError::InvalidKind { mode: meta.mode })?;
        Ok(Stat {
            ino: ino.0,
            kind,
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            size: meta.size,
            nlink: meta.nlink,
            blocks: meta.blocks,
            atime: meta.atime,
            mtime: meta.mtime,
            ctime: meta.ctime,
        })
    }

    // ── Inode lifecycle ─────────────────────────────────────────────────

    /// Get-or-load an inode: cache hit, or read the owning store
    /// block, decode, and install.
    pub(crate) fn iget(&self, ino: InodeNumber) -> Result<Arc<InodeSlot>> {
        if ino.0 >= self.sb.nr_inodes {
            return Err(QfsError::OutOfRange {
                ino: ino.0,
                nr_inodes: self.sb.nr_inodes,
            });
        }
        if let Some(slot) = self.cache.get(ino) {
            return Ok(slot);
        }

        let (block, offset) = self.sb.inode_location(ino);
        let buf = self.dev.read_block(block)?;
        let disk = DiskInode::parse_from_bytes(&buf.as_slice()[offset..offset + DiskInode::SIZE])
            .map_err(parse_err)?;
        Ok(self.cache.install(Inode::from_disk(ino, &disk)))
    }

    /// Write an inode record back to its slot in the inode store.
    pub(crate) fn write_inode(&self, meta: &Inode) -> Result<()> {
        let (block, offset) = self.sb.inode_location(meta.ino);
        let mut buf = self.dev.read_block(block)?;
        meta.to_disk()
            .encode_into(&mut buf.as_mut_slice()[offset..offset + DiskInode::SIZE])
            .map_err(parse_err)?;
        self.dev.write_block(block, buf.as_slice())
    }

    /// Allocate and initialize a new inode of `kind`, with its index
    /// block scrubbed, not yet linked into any directory.
    ///
    /// Every failure path releases whatever was already acquired, in
    /// reverse order, so a failed create leaks nothing.
    pub(crate) fn new_inode(&self, kind: FileKind) -> Result<Arc<InodeSlot>> {
        let (ino, bno) = {
            let mut alloc = self.alloc.lock();
            if alloc.nr_free_inodes() == 0 || alloc.nr_free_blocks() == 0 {
                return Err(QfsError::NoSpace);
            }
            let ino = alloc.allocate_inode()?;
            let bno = match alloc.allocate_block() {
                Ok(bno) => bno,
                Err(err) => {
                    alloc.free_inode(ino);
                    return Err(err);
                }
            };
            (ino, bno)
        };

        // Scrub the index block so stale data cannot leak into the
        // new file or directory table.
        if let Err(err) = self.dev.zero_block(bno) {
            self.release_numbers(ino, bno);
            return Err(err);
        }

        let now = unix_now();
        let mut meta = Inode {
            ino,
            mode: kind.mode_bits() | default_perms(kind),
            uid: 0,
            gid: 0,
            size: 0,
            ctime: now,
            atime: now,
            mtime: now,
            blocks: 1,
            nlink: 1,
            index_block: bno,
        };
        if kind == FileKind::Directory {
            // An empty directory still occupies its table block and
            // counts the implicit self references.
            meta.size = BLOCK_SIZE as u32;
            meta.nlink = 2;
        }

        if let Err(err) = self.write_inode(&meta) {
            self.release_numbers(ino, bno);
            return Err(err);
        }
        debug!(ino = ino.0, bno = bno.0, ?kind, "created inode");
        Ok(self.cache.install(meta))
    }

    /// Undo a `new_inode` whose caller could not link it anywhere.
    pub(crate) fn abandon_new_inode(&self, slot: &Arc<InodeSlot>) {
        let (ino, bno) = {
            let meta = slot.meta.lock();
            (meta.ino, meta.index_block)
        };
        self.cache.evict(ino);
        self.release_numbers(ino, bno);
    }

    fn release_numbers(&self, ino: InodeNumber, bno: BlockNumber) {
        let mut alloc = self.alloc.lock();
        alloc.free_block(bno);
        alloc.free_inode(ino);
    }

    /// Destroy an inode whose last link is gone: scrub and free its
    /// data blocks (regular files only), scrub its index block, zero
    /// the record, and return both numbers to the allocator.
    ///
    /// An unreadable index block is tolerated: the inode and the
    /// index-block number are still reclaimed, and the data blocks it
    /// pointed to are leaked for good. That is the format's
    /// documented best-effort trade-off, not something to fix here.
    pub(crate) fn destroy_inode(&self, meta: &mut Inode) -> Result<()> {
        let ino = meta.ino;
        let bno = meta.index_block;

        match self.dev.read_block(bno) {
            Ok(buf) => {
                if meta.is_regular() {
                    let index =
                        IndexBlock::parse_from_block(buf.as_slice()).map_err(parse_err)?;
                    let data_count = meta.blocks.saturating_sub(1) as usize;
                    for data in index.data_blocks(data_count) {
                        self.alloc.lock().free_block(data);
                        // Scrub is best-effort: the block is already
                        // free, so a failed write only skips hygiene.
                        if let Err(err) = self.dev.zero_block(data) {
                            warn!(block = data.0, %err, "data block scrub failed");
                        }
                    }
                }
                if let Err(err) = self.dev.zero_block(bno) {
                    warn!(block = bno.0, %err, "index block scrub failed");
                }
            }
            Err(err) => {
                warn!(
                    ino = ino.0,
                    block = bno.0,
                    %err,
                    "index block unreadable; destroying inode and leaking its data blocks"
                );
            }
        }

        meta.scrub();
        self.write_inode(meta)?;
        self.release_numbers(ino, bno);
        self.cache.evict(ino);
        debug!(ino = ino.0, "destroyed inode");
        Ok(())
    }

    // ── Block mapping (the seam the data-plane I/O layer calls) ─────────

    /// Append one freshly-allocated, zeroed data block to a regular
    /// file, growing its size by one block.
    pub fn append_data_block(&self, ino: InodeNumber) -> Result<BlockNumber> {
        let slot = self.iget(ino)?;
        let mut meta = slot.meta.lock();
        if !meta.is_regular() {
            return Err(QfsError::InvalidKind { mode: meta.mode });
        }
        if meta.blocks.saturating_sub(1) as usize >= MAX_FILE_BLOCKS {
            return Err(QfsError::NoSpace);
        }

        let bno = self.alloc.lock().allocate_block()?;
        let result = (|| {
            self.dev.zero_block(bno)?;
            let buf = self.dev.read_block(meta.index_block)?;
            let mut index = IndexBlock::parse_from_block(buf.as_slice()).map_err(parse_err)?;
            let free = index.first_free_slot().ok_or(QfsError::NoSpace)?;
            index.set_slot(free, bno);
            let mut out = BlockBuf::zeroed(BLOCK_SIZE);
            index.encode_into(out.as_mut_slice()).map_err(parse_err)?;
            self.dev.write_block(meta.index_block, out.as_slice())
        })();
        if let Err(err) = result {
            self.alloc.lock().free_block(bno);
            return Err(err);
        }

        meta.blocks += 1;
        meta.size += BLOCK_SIZE as u32;
        meta.mtime = unix_now();
        self.write_inode(&meta)?;
        Ok(bno)
    }

    /// Set access and modification times (utimens-style).
    pub fn set_times(&self, ino: InodeNumber, atime: u32, mtime: u32) -> Result<()> {
        let slot = self.iget(ino)?;
        let mut meta = slot.meta.lock();
        meta.atime = atime;
        meta.mtime = mtime;
        self.write_inode(&meta)
    }

    // ── Directory table I/O (shared by dir and evict) ───────────────────

    /// Read a directory's table from its index block. The caller
    /// holds the directory's meta lock for the whole
    /// read-modify-write.
    pub(crate) fn read_table(&self, dir_meta: &Inode) -> Result<DirBlock> {
        let buf = self.dev.read_block(dir_meta.index_block)?;
        DirBlock::parse_from_block(buf.as_slice()).map_err(parse_err)
    }

    /// Write a directory's table back as one unit.
    pub(crate) fn write_table(&self, dir_meta: &Inode, table: &DirBlock) -> Result<()> {
        let mut buf = BlockBuf::zeroed(BLOCK_SIZE);
        table.encode_into(buf.as_mut_slice()).map_err(parse_err)?;
        self.dev.write_block(dir_meta.index_block, buf.as_slice())
    }

    /// Validate a filename before any I/O.
    pub(crate) fn check_name(name: &[u8]) -> Result<()> {
        if name.len() > FILENAME_LEN {
            return Err(QfsError::NameTooLong);
        }
        Ok(())
    }
}

fn default_perms(kind: FileKind) -> u32 {
    match kind {
        FileKind::Directory => 0o755,
        FileKind::Regular => 0o644,
    }
}
