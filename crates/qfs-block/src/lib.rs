#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the [`ByteDevice`] and [`BlockDevice`] traits, a
//! file-backed device using pread/pwrite style I/O, and an in-memory
//! device for tests and scratch images. All I/O is synchronous and
//! blocking; the metadata layers above perform one whole-block read or
//! write per step.

use parking_lot::Mutex;
use qfs_error::{QfsError, Result};
use qfs_types::BlockNumber;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Invariant: length == block size of the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn zeroed(block_size: usize) -> Self {
        Self {
            bytes: vec![0_u8; block_size],
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed byte device.
///
/// Uses `std::os::unix::fs::FileExt`, which is thread-safe and does
/// not require a shared seek position. Falls back to read-only when
/// the image cannot be opened for writing.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(QfsError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "image opened read-only",
            )));
        }
        check_range(offset, buf.len(), self.len)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let len_u64 =
        u64::try_from(len).map_err(|_| QfsError::Format("I/O length overflows u64".to_owned()))?;
    let end = offset
        .checked_add(len_u64)
        .ok_or_else(|| QfsError::Format("I/O range overflows u64".to_owned()))?;
    if end > device_len {
        return Err(QfsError::Format(format!(
            "I/O out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// In-memory byte device for tests and scratch images.
#[derive(Debug)]
pub struct MemoryByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let offset = usize::try_from(offset)
            .map_err(|_| QfsError::Format("offset overflows usize".to_owned()))?;
        check_range(offset as u64, buf.len(), bytes.len() as u64)?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let offset = usize::try_from(offset)
            .map_err(|_| QfsError::Format("offset overflows usize".to_owned()))?;
        check_range(offset as u64, buf.len(), bytes.len() as u64)?;
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Block-addressed I/O interface consumed by the metadata layers.
pub trait BlockDevice: Send + Sync {
    /// Read a block by number.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Write a block by number. `data.len()` MUST equal `block_size()`.
    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()>;

    /// Device block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u32;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;

    /// Overwrite a block with zeroes (metadata scrubbing).
    fn zero_block(&self, block: BlockNumber) -> Result<()> {
        let zeroes = vec![
            0_u8;
            usize::try_from(self.block_size())
                .map_err(|_| QfsError::Format("block_size does not fit usize".to_owned()))?
        ];
        self.write_block(block, &zeroes)
    }
}

/// Adapter exposing any [`ByteDevice`] as a [`BlockDevice`].
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: u32,
    block_count: u32,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    pub fn new(inner: D, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(QfsError::Format(format!(
                "invalid block_size={block_size} (must be power of two)"
            )));
        }

        let len = inner.len_bytes();
        let block_size_u64 = u64::from(block_size);
        let remainder = len % block_size_u64;
        if remainder != 0 {
            return Err(QfsError::Format(format!(
                "image length is not block-aligned: len_bytes={len} block_size={block_size} remainder={remainder}"
            )));
        }
        let block_count = u32::try_from(len / block_size_u64).map_err(|_| {
            QfsError::Format(format!(
                "device too large: {} blocks exceed u32",
                len / block_size_u64
            ))
        })?;
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let offset = self.block_offset(block)?;
        let mut buf = BlockBuf::zeroed(self.block_size as usize);
        self.inner.read_exact_at(offset, buf.as_mut_slice())?;
        Ok(buf)
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        let expected = self.block_size as usize;
        if data.len() != expected {
            return Err(QfsError::Format(format!(
                "write_block data size mismatch: got={} expected={expected}",
                data.len()
            )));
        }
        let offset = self.block_offset(block)?;
        self.inner.write_all_at(offset, data)
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    fn block_offset(&self, block: BlockNumber) -> Result<u64> {
        if block.0 >= self.block_count {
            return Err(QfsError::Format(format!(
                "block out of range: block={} block_count={}",
                block.0, self.block_count
            )));
        }
        Ok(u64::from(block.0) * u64::from(self.block_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfs_types::BLOCK_SIZE;
    use std::io::Write;

    #[test]
    fn byte_block_device_round_trips() {
        let mem = MemoryByteDevice::new(BLOCK_SIZE * 4);
        let dev = ByteBlockDevice::new(mem, BLOCK_SIZE as u32).expect("device");

        dev.write_block(BlockNumber(2), &[7_u8; BLOCK_SIZE])
            .expect("write");
        let read = dev.read_block(BlockNumber(2)).expect("read");
        assert_eq!(read.as_slice(), &[7_u8; BLOCK_SIZE]);
    }

    #[test]
    fn zero_block_scrubs() {
        let mem = MemoryByteDevice::new(BLOCK_SIZE * 2);
        let dev = ByteBlockDevice::new(mem, BLOCK_SIZE as u32).expect("device");

        dev.write_block(BlockNumber(1), &[0xAA_u8; BLOCK_SIZE])
            .expect("write");
        dev.zero_block(BlockNumber(1)).expect("zero");
        let read = dev.read_block(BlockNumber(1)).expect("read");
        assert!(read.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let mem = MemoryByteDevice::new(BLOCK_SIZE * 2);
        let dev = ByteBlockDevice::new(mem, BLOCK_SIZE as u32).expect("device");

        assert!(dev.read_block(BlockNumber(2)).is_err());
        assert!(dev.write_block(BlockNumber(2), &[0_u8; BLOCK_SIZE]).is_err());
    }

    #[test]
    fn unaligned_image_is_rejected() {
        let mem = MemoryByteDevice::new(BLOCK_SIZE + 17);
        assert!(ByteBlockDevice::new(mem, BLOCK_SIZE as u32).is_err());
    }

    #[test]
    fn file_byte_device_round_trips() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0_u8; BLOCK_SIZE * 2]).expect("fill");
        tmp.flush().expect("flush");

        let dev = FileByteDevice::open(tmp.path()).expect("open");
        assert!(dev.writable());
        dev.write_all_at(BLOCK_SIZE as u64, &[5_u8; 16]).expect("write");
        let mut buf = [0_u8; 16];
        dev.read_exact_at(BLOCK_SIZE as u64, &mut buf).expect("read");
        assert_eq!(buf, [5_u8; 16]);
    }
}
