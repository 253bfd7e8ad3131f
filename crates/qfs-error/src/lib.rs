#![forbid(unsafe_code)]
//! Error types for QuicheFS.
//!
//! QuicheFS uses a two-layer error model: byte-level decode failures
//! are `ParseError` in `qfs-types`, and everything user-facing is
//! [`QfsError`] here. `qfs-error` MUST NOT depend on `qfs-types` or
//! `qfs-ondisk`; the conversion from `ParseError` happens in
//! `qfs-core`, which depends on both.
//!
//! ## errno mapping
//!
//! Every variant maps to exactly one POSIX errno via
//! [`QfsError::to_errno`]. The mapping is exhaustive (no wildcard
//! arms) so adding a variant is a compile error until its errno is
//! assigned.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | `EIO` |
//! | `Format` | `EINVAL` |
//! | `Parse` | `EINVAL` |
//! | `OutOfRange` | `EINVAL` |
//! | `InvalidKind` | `EINVAL` |
//! | `NoSpace` | `ENOSPC` |
//! | `NotFound` | `ENOENT` |
//! | `AlreadyExists` | `EEXIST` |
//! | `NameTooLong` | `ENAMETOOLONG` |
//! | `DirectoryFull` | `EMLINK` |
//! | `NotEmpty` | `ENOTEMPTY` |
//! | `Unsupported` | `EINVAL` |
//! | `NoVictim` | `ENOSPC` |
//!
//! `DirectoryFull` → `EMLINK` and `Unsupported` → `EINVAL` preserve
//! the errnos the on-disk format's reference driver returned for the
//! same conditions; changing them would break callers that key on the
//! errno rather than the variant.

use thiserror::Error;

/// Unified error type for all QuicheFS operations.
#[derive(Debug, Error)]
pub enum QfsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid on-disk format detected at mount time (bad magic,
    /// geometry inconsistent with the device size).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Metadata decode failure surfaced from the codec layer.
    ///
    /// Carries the string form of a `qfs-types` `ParseError` so the
    /// diagnostic survives the crate boundary.
    #[error("parse error: {0}")]
    Parse(String),

    /// Inode number beyond the filesystem's inode capacity.
    #[error("inode {ino} out of range (filesystem has {nr_inodes} inodes)")]
    OutOfRange { ino: u32, nr_inodes: u32 },

    /// Create requested with a mode that is neither a directory nor a
    /// regular file.
    #[error("unsupported file kind: mode {mode:#o}")]
    InvalidKind { mode: u32 },

    /// No free blocks or inodes available.
    #[error("no space left on device")]
    NoSpace,

    /// Named entry not present in the directory.
    #[error("not found: {0}")]
    NotFound(String),

    /// Target name already present in the directory.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// Filename exceeds the fixed on-disk name width.
    #[error("name too long")]
    NameTooLong,

    /// The directory table has no sentinel slot left.
    #[error("directory is full")]
    DirectoryFull,

    /// rmdir on a directory with live children.
    #[error("directory not empty")]
    NotEmpty,

    /// Rename exchange/whiteout and other unimplemented variants.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Reclamation scanned the whole tree without finding an eligible
    /// regular file. Expected only when every file is held open, which
    /// is an invariant violation rather than a normal outcome.
    #[error("no eviction victim found")]
    NoVictim,
}

impl QfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// Exhaustive: every variant has an explicit arm.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Format(_) | Self::Parse(_) => libc::EINVAL,
            Self::OutOfRange { .. } | Self::InvalidKind { .. } | Self::Unsupported(_) => {
                libc::EINVAL
            }
            Self::NoSpace | Self::NoVictim => libc::ENOSPC,
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::DirectoryFull => libc::EMLINK,
            Self::NotEmpty => libc::ENOTEMPTY,
        }
    }
}

/// Result alias using `QfsError`.
pub type Result<T> = std::result::Result<T, QfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(QfsError, libc::c_int)> = vec![
            (QfsError::Io(std::io::Error::other("test")), libc::EIO),
            (QfsError::Format("bad magic".into()), libc::EINVAL),
            (QfsError::Parse("short read".into()), libc::EINVAL),
            (
                QfsError::OutOfRange {
                    ino: 9,
                    nr_inodes: 8,
                },
                libc::EINVAL,
            ),
            (QfsError::InvalidKind { mode: 0o120_777 }, libc::EINVAL),
            (QfsError::NoSpace, libc::ENOSPC),
            (QfsError::NotFound("a.txt".into()), libc::ENOENT),
            (QfsError::AlreadyExists("a.txt".into()), libc::EEXIST),
            (QfsError::NameTooLong, libc::ENAMETOOLONG),
            (QfsError::DirectoryFull, libc::EMLINK),
            (QfsError::NotEmpty, libc::ENOTEMPTY),
            (QfsError::Unsupported("rename exchange"), libc::EINVAL),
            (QfsError::NoVictim, libc::ENOSPC),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EPERM);
        let err = QfsError::Io(raw);
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn display_formatting() {
        let full = QfsError::DirectoryFull;
        assert_eq!(full.to_string(), "directory is full");

        let range = QfsError::OutOfRange {
            ino: 300,
            nr_inodes: 256,
        };
        assert_eq!(
            range.to_string(),
            "inode 300 out of range (filesystem has 256 inodes)"
        );

        let kind = QfsError::InvalidKind { mode: 0o120_000 };
        assert_eq!(kind.to_string(), "unsupported file kind: mode 0o120000");
    }
}
