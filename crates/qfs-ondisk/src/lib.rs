#![forbid(unsafe_code)]
//! On-disk metadata codec.
//!
//! Translates the fixed-width, little-endian QuicheFS metadata
//! layouts to and from in-memory structures. Pure and stateless: no
//! I/O happens here, and no checksums exist in the format: a caller
//! that feeds in garbage gets garbage records back, exactly as the
//! format specifies.
//!
//! Disk layout, in block order:
//!
//! ```text
//! | superblock | inode store | inode bitmap | block bitmap | data |
//! ```
//!
//! Every multi-byte field is little-endian. The directory table and
//! the file index block are two interpretations of the same per-inode
//! index block.

mod dir_block;
mod index_block;
mod inode;
mod super_block;

pub use dir_block::{DirBlock, DirEntry};
pub use index_block::IndexBlock;
pub use inode::{DiskInode, FileKind, S_IFDIR, S_IFMT, S_IFREG};
pub use super_block::SuperBlock;
