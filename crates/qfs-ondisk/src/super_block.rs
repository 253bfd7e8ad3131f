use qfs_types::{
    read_le_u32, write_le_u32, BlockNumber, InodeNumber, ParseError, BLOCK_SIZE, INODES_PER_BLOCK,
    QUICHEFS_MAGIC,
};
use serde::{Deserialize, Serialize};

/// Superblock: eight little-endian u32 fields at the start of block 0.
///
/// Provides magic validation and locates the other on-disk regions.
/// The free counters are advisory copies of the bitmap state, written
/// back on sync/unmount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub magic: u32,
    /// Total blocks on the device.
    pub nr_blocks: u32,
    /// Total inode records.
    pub nr_inodes: u32,
    /// Blocks occupied by the inode store.
    pub nr_istore_blocks: u32,
    /// Blocks occupied by the inode-free bitmap.
    pub nr_ifree_blocks: u32,
    /// Blocks occupied by the block-free bitmap.
    pub nr_bfree_blocks: u32,
    pub nr_free_inodes: u32,
    pub nr_free_blocks: u32,
}

impl SuperBlock {
    /// Encoded size in bytes (the rest of block 0 is zero).
    pub const SIZE: usize = 32;

    /// Decode from the raw contents of block 0, checking the magic.
    pub fn parse_from_block(bytes: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(bytes, 0)?;
        if magic != QUICHEFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: QUICHEFS_MAGIC,
                actual: magic,
            });
        }
        Ok(Self {
            magic,
            nr_blocks: read_le_u32(bytes, 4)?,
            nr_inodes: read_le_u32(bytes, 8)?,
            nr_istore_blocks: read_le_u32(bytes, 12)?,
            nr_ifree_blocks: read_le_u32(bytes, 16)?,
            nr_bfree_blocks: read_le_u32(bytes, 20)?,
            nr_free_inodes: read_le_u32(bytes, 24)?,
            nr_free_blocks: read_le_u32(bytes, 28)?,
        })
    }

    /// Encode into the head of a block-sized buffer.
    pub fn encode_into(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        write_le_u32(bytes, 0, self.magic)?;
        write_le_u32(bytes, 4, self.nr_blocks)?;
        write_le_u32(bytes, 8, self.nr_inodes)?;
        write_le_u32(bytes, 12, self.nr_istore_blocks)?;
        write_le_u32(bytes, 16, self.nr_ifree_blocks)?;
        write_le_u32(bytes, 20, self.nr_bfree_blocks)?;
        write_le_u32(bytes, 24, self.nr_free_inodes)?;
        write_le_u32(bytes, 28, self.nr_free_blocks)?;
        Ok(())
    }

    /// First block of the inode store (always 1; block 0 is the
    /// superblock).
    #[must_use]
    pub fn istore_first(&self) -> BlockNumber {
        BlockNumber(1)
    }

    /// First block of the inode-free bitmap.
    #[must_use]
    pub fn ifree_first(&self) -> BlockNumber {
        BlockNumber(1 + self.nr_istore_blocks)
    }

    /// First block of the block-free bitmap.
    #[must_use]
    pub fn bfree_first(&self) -> BlockNumber {
        BlockNumber(1 + self.nr_istore_blocks + self.nr_ifree_blocks)
    }

    /// First data block; everything before it is reserved metadata.
    #[must_use]
    pub fn data_first(&self) -> BlockNumber {
        BlockNumber(1 + self.nr_istore_blocks + self.nr_ifree_blocks + self.nr_bfree_blocks)
    }

    /// Locate an inode record in the store: owning block and the byte
    /// offset of the record within it.
    #[must_use]
    pub fn inode_location(&self, ino: InodeNumber) -> (BlockNumber, usize) {
        let per_block = INODES_PER_BLOCK as u32;
        let block = BlockNumber(self.istore_first().0 + ino.0 / per_block);
        let offset = (ino.0 % per_block) as usize * crate::DiskInode::SIZE;
        (block, offset)
    }

    /// Sanity-check geometry against the device size.
    #[must_use]
    pub fn geometry_fits(&self, device_blocks: u32) -> bool {
        self.nr_blocks <= device_blocks && self.data_first().0 < self.nr_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SuperBlock {
        SuperBlock {
            magic: QUICHEFS_MAGIC,
            nr_blocks: 1024,
            nr_inodes: 1024,
            nr_istore_blocks: 11,
            nr_ifree_blocks: 1,
            nr_bfree_blocks: 1,
            nr_free_inodes: 1023,
            nr_free_blocks: 1009,
        }
    }

    #[test]
    fn encode_parse_round_trip() {
        let sb = sample();
        let mut block = vec![0_u8; BLOCK_SIZE];
        sb.encode_into(&mut block).unwrap();
        assert_eq!(SuperBlock::parse_from_block(&block).unwrap(), sb);
        // Tail of block 0 stays zero.
        assert!(block[SuperBlock::SIZE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut block = vec![0_u8; BLOCK_SIZE];
        sample().encode_into(&mut block).unwrap();
        block[0] ^= 0xFF;
        assert!(matches!(
            SuperBlock::parse_from_block(&block),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn region_layout_is_contiguous() {
        let sb = sample();
        assert_eq!(sb.istore_first().0, 1);
        assert_eq!(sb.ifree_first().0, 12);
        assert_eq!(sb.bfree_first().0, 13);
        assert_eq!(sb.data_first().0, 14);
        assert!(sb.geometry_fits(1024));
        assert!(!sb.geometry_fits(13));
    }

    #[test]
    fn inode_location_walks_the_store() {
        let sb = sample();
        assert_eq!(sb.inode_location(InodeNumber(0)), (BlockNumber(1), 0));
        assert_eq!(
            sb.inode_location(InodeNumber(1)),
            (BlockNumber(1), crate::DiskInode::SIZE)
        );
        assert_eq!(sb.inode_location(InodeNumber(102)), (BlockNumber(2), 0));
    }
}
