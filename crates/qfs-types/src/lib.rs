#![forbid(unsafe_code)]
//! Core types shared by every QuicheFS crate.
//!
//! Newtypes for inode and block numbers, the on-disk geometry
//! constants, and the little-endian read/write helpers used by the
//! metadata codec in `qfs-ondisk`. This crate must stay free of I/O
//! and of dependencies on the other workspace crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Superblock magic ("WICH" read as a little-endian u32).
pub const QUICHEFS_MAGIC: u32 = 0x4843_4957;

/// Fixed block size in bytes. Every metadata structure lives in
/// exactly one block.
pub const BLOCK_SIZE: usize = 4096;

/// On-disk inode record size in bytes (ten little-endian u32 fields).
pub const INODE_SIZE: usize = 40;

/// Inode records per inode-store block (tail bytes unused).
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Maximum filename length in bytes. Shorter names are NUL-padded to
/// the full width inside a directory entry.
pub const FILENAME_LEN: usize = 28;

/// Directory entry size: a u32 inode number plus the fixed-width name.
pub const DIR_ENTRY_SIZE: usize = 4 + FILENAME_LEN;

/// Directory table capacity. The whole table lives in the directory's
/// index block, so this is a hard ceiling on directory size.
pub const MAX_SUBFILES: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// Block-number slots in a regular file's index block.
pub const INDEX_SLOTS: usize = BLOCK_SIZE / 4;

/// Maximum data blocks per regular file. The inode's `blocks` field
/// counts the index block itself, so one slot's worth is reserved.
pub const MAX_FILE_BLOCKS: usize = INDEX_SLOTS - 1;

/// The root directory is always inode 0. A zero inode number inside a
/// directory table is the end-of-list sentinel, which is unambiguous
/// because the root never appears as a child entry.
pub const ROOT_INO: InodeNumber = InodeNumber(0);

/// Bits per bitmap block, for sizing the free-inode/free-block maps.
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte-level decode failure from the metadata codec.
///
/// Converted into the user-facing `QfsError` at the `qfs-core`
/// boundary; this crate intentionally knows nothing about errnos.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    let end = offset.checked_add(4).filter(|end| *end <= data.len());
    if end.is_none() {
        return Err(ParseError::InsufficientData {
            needed: 4,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Number of blocks needed to hold `items` at `per_block` each.
#[must_use]
pub fn blocks_for(items: usize, per_block: usize) -> usize {
    items.div_ceil(per_block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_constants_are_consistent() {
        assert_eq!(INODES_PER_BLOCK, 102);
        assert_eq!(DIR_ENTRY_SIZE, 32);
        assert_eq!(MAX_SUBFILES, 128);
        assert_eq!(INDEX_SLOTS, 1024);
        assert_eq!(MAX_FILE_BLOCKS, 1023);
        assert_eq!(MAX_SUBFILES * DIR_ENTRY_SIZE, BLOCK_SIZE);
    }

    #[test]
    fn read_le_u32_reads_in_order() {
        let data = [0x57, 0x49, 0x43, 0x48, 0xFF];
        assert_eq!(read_le_u32(&data, 0).unwrap(), QUICHEFS_MAGIC);
        assert!(matches!(
            read_le_u32(&data, 2),
            Err(ParseError::InsufficientData { needed: 4, .. })
        ));
    }

    #[test]
    fn write_le_u32_round_trips() {
        let mut buf = [0_u8; 8];
        write_le_u32(&mut buf, 4, 0xDEAD_BEEF).unwrap();
        assert_eq!(read_le_u32(&buf, 4).unwrap(), 0xDEAD_BEEF);
        assert!(write_le_u32(&mut buf, 6, 1).is_err());
    }

    #[test]
    fn blocks_for_rounds_up() {
        assert_eq!(blocks_for(0, 102), 0);
        assert_eq!(blocks_for(1, 102), 1);
        assert_eq!(blocks_for(102, 102), 1);
        assert_eq!(blocks_for(103, 102), 2);
    }
}
