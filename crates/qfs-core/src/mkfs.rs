//! Image formatting.

use crate::fs::parse_err;
use crate::inode::unix_now;
use qfs_alloc::BitmapAllocator;
use qfs_block::{BlockBuf, BlockDevice};
use qfs_error::{QfsError, Result};
use qfs_ondisk::{DiskInode, SuperBlock, S_IFDIR};
use qfs_types::{
    blocks_for, BlockNumber, BITS_PER_BLOCK, BLOCK_SIZE, INODES_PER_BLOCK, QUICHEFS_MAGIC,
};
use tracing::info;

/// Format a device: derive the geometry from its size, lay down the
/// superblock, inode store, both bitmaps, and an empty root directory.
/// Everything on the device is considered garbage and overwritten.
///
/// One inode is provisioned per block, matching the reference layout
/// for this format.
pub fn mkfs(dev: &dyn BlockDevice) -> Result<SuperBlock> {
    if dev.block_size() as usize != BLOCK_SIZE {
        return Err(QfsError::Format(format!(
            "unsupported block size {} (need {BLOCK_SIZE})",
            dev.block_size()
        )));
    }

    let nr_blocks = dev.block_count();
    let nr_inodes = nr_blocks;
    let mut sb = SuperBlock {
        magic: QUICHEFS_MAGIC,
        nr_blocks,
        nr_inodes,
        nr_istore_blocks: blocks_for(nr_inodes as usize, INODES_PER_BLOCK) as u32,
        nr_ifree_blocks: blocks_for(nr_inodes as usize, BITS_PER_BLOCK) as u32,
        nr_bfree_blocks: blocks_for(nr_blocks as usize, BITS_PER_BLOCK) as u32,
        nr_free_inodes: 0,
        nr_free_blocks: 0,
    };
    if !sb.geometry_fits(nr_blocks) {
        return Err(QfsError::Format(format!(
            "device too small: {nr_blocks} blocks leave no room for data"
        )));
    }

    let mut alloc = BitmapAllocator::format(&sb);

    // Scrub the inode store so records from a previous life cannot
    // resurface.
    for i in 0..sb.nr_istore_blocks {
        dev.zero_block(BlockNumber(sb.istore_first().0 + i))?;
    }

    // Root directory: inode 0, empty table in the first data block.
    let root_index = sb.data_first();
    alloc.reserve_block(root_index);
    dev.zero_block(root_index)?;

    let now = unix_now();
    let root = DiskInode {
        mode: S_IFDIR | 0o755,
        uid: 0,
        gid: 0,
        size: BLOCK_SIZE as u32,
        ctime: now,
        atime: now,
        mtime: now,
        blocks: 1,
        nlink: 2,
        index_block: root_index.0,
    };
    let mut buf = dev.read_block(sb.istore_first())?;
    root.encode_into(&mut buf.as_mut_slice()[..DiskInode::SIZE])
        .map_err(parse_err)?;
    dev.write_block(sb.istore_first(), buf.as_slice())?;

    sb.nr_free_inodes = alloc.nr_free_inodes();
    sb.nr_free_blocks = alloc.nr_free_blocks();
    let mut sb_buf = BlockBuf::zeroed(BLOCK_SIZE);
    sb.encode_into(sb_buf.as_mut_slice()).map_err(parse_err)?;
    dev.write_block(BlockNumber(0), sb_buf.as_slice())?;

    alloc.flush(&sb, dev)?;
    dev.sync()?;
    info!(
        nr_blocks,
        nr_inodes,
        free_blocks = sb.nr_free_blocks,
        "formatted image"
    );
    Ok(sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfs_block::{ByteBlockDevice, MemoryByteDevice};

    fn device(blocks: usize) -> ByteBlockDevice<MemoryByteDevice> {
        ByteBlockDevice::new(MemoryByteDevice::new(blocks * BLOCK_SIZE), BLOCK_SIZE as u32)
            .unwrap()
    }

    #[test]
    fn format_writes_a_mountable_superblock() {
        let dev = device(64);
        let sb = mkfs(&dev).unwrap();

        let block0 = dev.read_block(BlockNumber(0)).unwrap();
        let parsed = SuperBlock::parse_from_block(block0.as_slice()).unwrap();
        assert_eq!(parsed, sb);
        assert_eq!(sb.nr_blocks, 64);
        assert_eq!(sb.nr_inodes, 64);
        // sb + istore + 2 bitmaps + root index block are in use.
        assert_eq!(sb.nr_free_blocks, 64 - 5);
        assert_eq!(sb.nr_free_inodes, 63);
    }

    #[test]
    fn root_inode_is_an_empty_directory() {
        let dev = device(64);
        let sb = mkfs(&dev).unwrap();

        let istore = dev.read_block(sb.istore_first()).unwrap();
        let root = DiskInode::parse_from_bytes(&istore.as_slice()[..DiskInode::SIZE]).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);
        assert_eq!(root.blocks, 1);
        assert_eq!(root.index_block().0, sb.data_first().0);

        let table = dev.read_block(root.index_block()).unwrap();
        assert!(table.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn too_small_device_is_rejected() {
        // 4 blocks: superblock + istore + bitmaps leave no data block.
        let dev = device(4);
        assert!(matches!(mkfs(&dev), Err(QfsError::Format(_))));
    }
}
