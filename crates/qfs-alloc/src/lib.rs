#![forbid(unsafe_code)]
//! Free-inode and free-block accounting.
//!
//! The allocator is the sole owner of the two on-disk bitmaps (bit
//! set = in use). Both are loaded whole at mount time, mutated in
//! memory, and written back on sync; the reference driver for this
//! format does the same, so a crash between sync points loses
//! allocation state along with everything else (the format has no
//! journal).
//!
//! First-fit: allocation always returns the lowest free number. Tests
//! rely on that determinism.

use qfs_block::BlockDevice;
use qfs_error::{QfsError, Result};
use qfs_ondisk::SuperBlock;
use qfs_types::{blocks_for, BlockNumber, InodeNumber, BITS_PER_BLOCK, BLOCK_SIZE};
use tracing::trace;

// ── Raw bitmap operations ───────────────────────────────────────────────────

#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count free (zero) bits in the first `count` bits.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    (0..count).filter(|idx| !bitmap_get(bitmap, *idx)).count() as u32
}

/// First free (zero) bit in the first `count` bits.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u32) -> Option<u32> {
    (0..count).find(|idx| !bitmap_get(bitmap, *idx))
}

// ── Allocator ───────────────────────────────────────────────────────────────

/// In-memory bitmap allocator for one mounted filesystem.
///
/// Callers serialize access behind a mutex in `qfs-core`; this type
/// itself is plain data.
#[derive(Debug)]
pub struct BitmapAllocator {
    inode_bitmap: Vec<u8>,
    block_bitmap: Vec<u8>,
    nr_inodes: u32,
    nr_blocks: u32,
    nr_free_inodes: u32,
    nr_free_blocks: u32,
}

impl BitmapAllocator {
    /// Build a freshly-formatted allocator: every metadata block
    /// (superblock, inode store, both bitmaps) is marked used, as is
    /// inode 0 (the root). The caller additionally marks the root
    /// directory's index block once it allocates it.
    #[must_use]
    pub fn format(sb: &SuperBlock) -> Self {
        let mut alloc = Self {
            inode_bitmap: vec![0_u8; blocks_for(sb.nr_inodes as usize, BITS_PER_BLOCK) * BLOCK_SIZE],
            block_bitmap: vec![0_u8; blocks_for(sb.nr_blocks as usize, BITS_PER_BLOCK) * BLOCK_SIZE],
            nr_inodes: sb.nr_inodes,
            nr_blocks: sb.nr_blocks,
            nr_free_inodes: sb.nr_inodes,
            nr_free_blocks: sb.nr_blocks,
        };

        for block in 0..sb.data_first().0 {
            bitmap_set(&mut alloc.block_bitmap, block);
        }
        alloc.nr_free_blocks -= sb.data_first().0;

        bitmap_set(&mut alloc.inode_bitmap, 0);
        alloc.nr_free_inodes -= 1;

        alloc
    }

    /// Load both bitmaps from a mounted device. The free counters are
    /// recomputed from the bitmaps rather than trusted from the
    /// superblock copy.
    pub fn load(sb: &SuperBlock, dev: &dyn BlockDevice) -> Result<Self> {
        let inode_bitmap = read_region(dev, sb.ifree_first(), sb.nr_ifree_blocks)?;
        let block_bitmap = read_region(dev, sb.bfree_first(), sb.nr_bfree_blocks)?;
        let nr_free_inodes = bitmap_count_free(&inode_bitmap, sb.nr_inodes);
        let nr_free_blocks = bitmap_count_free(&block_bitmap, sb.nr_blocks);
        Ok(Self {
            inode_bitmap,
            block_bitmap,
            nr_inodes: sb.nr_inodes,
            nr_blocks: sb.nr_blocks,
            nr_free_inodes,
            nr_free_blocks,
        })
    }

    /// Write both bitmaps back to the device.
    pub fn flush(&self, sb: &SuperBlock, dev: &dyn BlockDevice) -> Result<()> {
        write_region(dev, sb.ifree_first(), &self.inode_bitmap)?;
        write_region(dev, sb.bfree_first(), &self.block_bitmap)?;
        Ok(())
    }

    pub fn allocate_inode(&mut self) -> Result<InodeNumber> {
        let ino = bitmap_find_free(&self.inode_bitmap, self.nr_inodes).ok_or(QfsError::NoSpace)?;
        bitmap_set(&mut self.inode_bitmap, ino);
        self.nr_free_inodes -= 1;
        trace!(ino, "allocated inode");
        Ok(InodeNumber(ino))
    }

    pub fn free_inode(&mut self, ino: InodeNumber) {
        debug_assert!(bitmap_get(&self.inode_bitmap, ino.0), "double free of inode");
        bitmap_clear(&mut self.inode_bitmap, ino.0);
        self.nr_free_inodes += 1;
        trace!(ino = ino.0, "freed inode");
    }

    pub fn allocate_block(&mut self) -> Result<BlockNumber> {
        let bno = bitmap_find_free(&self.block_bitmap, self.nr_blocks).ok_or(QfsError::NoSpace)?;
        bitmap_set(&mut self.block_bitmap, bno);
        self.nr_free_blocks -= 1;
        trace!(bno, "allocated block");
        Ok(BlockNumber(bno))
    }

    pub fn free_block(&mut self, bno: BlockNumber) {
        debug_assert!(bitmap_get(&self.block_bitmap, bno.0), "double free of block");
        bitmap_clear(&mut self.block_bitmap, bno.0);
        self.nr_free_blocks += 1;
        trace!(bno = bno.0, "freed block");
    }

    /// Mark a specific block used (mkfs reserving the root's index
    /// block).
    pub fn reserve_block(&mut self, bno: BlockNumber) {
        debug_assert!(!bitmap_get(&self.block_bitmap, bno.0));
        bitmap_set(&mut self.block_bitmap, bno.0);
        self.nr_free_blocks -= 1;
    }

    #[must_use]
    pub fn nr_free_inodes(&self) -> u32 {
        self.nr_free_inodes
    }

    #[must_use]
    pub fn nr_free_blocks(&self) -> u32 {
        self.nr_free_blocks
    }

    #[must_use]
    pub fn inode_is_used(&self, ino: InodeNumber) -> bool {
        bitmap_get(&self.inode_bitmap, ino.0)
    }

    #[must_use]
    pub fn block_is_used(&self, bno: BlockNumber) -> bool {
        bitmap_get(&self.block_bitmap, bno.0)
    }
}

fn read_region(dev: &dyn BlockDevice, first: BlockNumber, count: u32) -> Result<Vec<u8>> {
    let mut region = Vec::with_capacity(count as usize * BLOCK_SIZE);
    for i in 0..count {
        let buf = dev.read_block(BlockNumber(first.0 + i))?;
        region.extend_from_slice(buf.as_slice());
    }
    Ok(region)
}

fn write_region(dev: &dyn BlockDevice, first: BlockNumber, region: &[u8]) -> Result<()> {
    for (i, chunk) in region.chunks(BLOCK_SIZE).enumerate() {
        dev.write_block(BlockNumber(first.0 + i as u32), chunk)?;
    }
    Ok(())
}
