use qfs_types::{read_le_u32, write_le_u32, BlockNumber, ParseError};
use serde::{Deserialize, Serialize};

/// File-type mask within `mode`.
pub const S_IFMT: u32 = 0o170_000;
/// Directory bit pattern.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular-file bit pattern.
pub const S_IFREG: u32 = 0o100_000;

/// The two file kinds the format supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Directory,
    Regular,
}

impl FileKind {
    /// Decode from a mode value; `None` for any other file type.
    #[must_use]
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFDIR => Some(Self::Directory),
            S_IFREG => Some(Self::Regular),
            _ => None,
        }
    }

    /// The file-type bits for this kind.
    #[must_use]
    pub fn mode_bits(self) -> u32 {
        match self {
            Self::Directory => S_IFDIR,
            Self::Regular => S_IFREG,
        }
    }
}

/// One 40-byte on-disk inode record: ten little-endian u32 fields in
/// declaration order. Timestamps are whole seconds since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub ctime: u32,
    pub atime: u32,
    pub mtime: u32,
    /// Block count, including the index block itself.
    pub blocks: u32,
    pub nlink: u32,
    /// The inode's index block: a directory table for directories, a
    /// table of data-block pointers for regular files. Zero after the
    /// inode has been destroyed.
    pub index_block: u32,
}

impl DiskInode {
    pub const SIZE: usize = 40;

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            mode: read_le_u32(bytes, 0)?,
            uid: read_le_u32(bytes, 4)?,
            gid: read_le_u32(bytes, 8)?,
            size: read_le_u32(bytes, 12)?,
            ctime: read_le_u32(bytes, 16)?,
            atime: read_le_u32(bytes, 20)?,
            mtime: read_le_u32(bytes, 24)?,
            blocks: read_le_u32(bytes, 28)?,
            nlink: read_le_u32(bytes, 32)?,
            index_block: read_le_u32(bytes, 36)?,
        })
    }

    pub fn encode_into(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        write_le_u32(bytes, 0, self.mode)?;
        write_le_u32(bytes, 4, self.uid)?;
        write_le_u32(bytes, 8, self.gid)?;
        write_le_u32(bytes, 12, self.size)?;
        write_le_u32(bytes, 16, self.ctime)?;
        write_le_u32(bytes, 20, self.atime)?;
        write_le_u32(bytes, 24, self.mtime)?;
        write_le_u32(bytes, 28, self.blocks)?;
        write_le_u32(bytes, 32, self.nlink)?;
        write_le_u32(bytes, 36, self.index_block)?;
        Ok(())
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

    #[must_use]
    pub fn index_block(&self) -> BlockNumber {
        BlockNumber(self.index_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_are_stable() {
        let inode = DiskInode {
            mode: S_IFREG | 0o644,
            uid: 1,
            gid: 2,
            size: 3,
            ctime: 4,
            atime: 5,
            mtime: 6,
            blocks: 7,
            nlink: 8,
            index_block: 9,
        };
        let mut bytes = [0_u8; DiskInode::SIZE];
        inode.encode_into(&mut bytes).unwrap();

        // Spot-check the wire positions so layout drift is caught.
        assert_eq!(read_le_u32(&bytes, 0).unwrap(), S_IFREG | 0o644);
        assert_eq!(read_le_u32(&bytes, 12).unwrap(), 3);
        assert_eq!(read_le_u32(&bytes, 24).unwrap(), 6);
        assert_eq!(read_le_u32(&bytes, 36).unwrap(), 9);

        assert_eq!(DiskInode::parse_from_bytes(&bytes).unwrap(), inode);
    }

    #[test]
    fn kind_decoding() {
        assert_eq!(FileKind::from_mode(S_IFDIR | 0o755), Some(FileKind::Directory));
        assert_eq!(FileKind::from_mode(S_IFREG | 0o644), Some(FileKind::Regular));
        assert_eq!(FileKind::from_mode(0o120_777), None); // symlink
        assert_eq!(FileKind::from_mode(0), None);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let bytes = [0_u8; DiskInode::SIZE - 1];
        assert!(DiskInode::parse_from_bytes(&bytes).is_err());
    }
}
