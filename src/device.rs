/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Slowfs.
 *
 * Slowfs is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Slowfs is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Slowfs. If not, see <https://www.gnu.org/licenses/>.
 */

//! Block devices: random access to an array of fixed-size blocks.

use crate::error::{FsError, FsResult};
use log::info;
use std::ffi::c_long;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, size_of::<$c>() as c_long)
    };
}

/// ioctl command: Get size of disk in bytes.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// Returns the size in bytes of the given file or block device.
pub fn host_device_size(dev: &File) -> io::Result<u64> {
    let metadata = dev.metadata()?;
    let file_type = metadata.file_type();
    if file_type.is_block_device() || file_type.is_char_device() {
        let mut size = 0u64;
        let ret = unsafe { libc::ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(size)
    } else {
        Ok(metadata.len())
    }
}

/// A random-access array of [`BLOCK_SIZE`]-sized blocks.
///
/// No caching, no partial-block I/O. A write is acknowledged only once the
/// backing store has accepted it.
pub trait BlockDevice {
    /// Reads block `no` into `buf`.
    fn read_block(&mut self, no: u32, buf: &mut [u8; BLOCK_SIZE]) -> FsResult<()>;
    /// Writes `buf` to block `no`.
    fn write_block(&mut self, no: u32, buf: &[u8; BLOCK_SIZE]) -> FsResult<()>;
    /// Returns the number of blocks on the device.
    fn block_count(&self) -> u32;
}

/// A block device backed by a host file of exact length
/// `block_count * BLOCK_SIZE`.
pub struct FileDevice {
    /// The backing file, released when the device is dropped.
    file: File,
    /// The number of blocks of the device.
    block_count: u32,
}

impl FileDevice {
    /// Opens an existing image file.
    ///
    /// The file length must be a non-zero multiple of the block size.
    pub fn open(path: &Path) -> FsResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = host_device_size(&file)?;
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(FsError::corrupted("image length is not a multiple of the block size"));
        }
        Ok(Self {
            file,
            block_count: (len / BLOCK_SIZE as u64) as u32,
        })
    }

    /// Creates (or truncates) an image file of `block_count` blocks.
    pub fn create(path: &Path, block_count: u32) -> FsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_count as u64 * BLOCK_SIZE as u64)?;
        info!("created image {} ({block_count} blocks)", path.display());
        Ok(Self { file, block_count })
    }

    /// Seeks to the beginning of block `no`, checking bounds.
    fn seek_block(&mut self, no: u32) -> FsResult<()> {
        if no >= self.block_count {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block number out of range",
            )));
        }
        self.file
            .seek(SeekFrom::Start(no as u64 * BLOCK_SIZE as u64))?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn read_block(&mut self, no: u32, buf: &mut [u8; BLOCK_SIZE]) -> FsResult<()> {
        self.seek_block(no)?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&mut self, no: u32, buf: &[u8; BLOCK_SIZE]) -> FsResult<()> {
        self.seek_block(no)?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }
}

/// An in-memory block device, backing the rootfs and tests.
pub struct MemDevice {
    blocks: Vec<u8>,
}

impl MemDevice {
    /// Creates a zeroed in-memory device of `block_count` blocks.
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: vec![0; block_count as usize * BLOCK_SIZE],
        }
    }

    /// Checks bounds and returns the byte offset of block `no`.
    fn offset(&self, no: u32) -> FsResult<usize> {
        let off = no as usize * BLOCK_SIZE;
        if off >= self.blocks.len() {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block number out of range",
            )));
        }
        Ok(off)
    }
}

impl BlockDevice for MemDevice {
    fn read_block(&mut self, no: u32, buf: &mut [u8; BLOCK_SIZE]) -> FsResult<()> {
        let off = self.offset(no)?;
        buf.copy_from_slice(&self.blocks[off..off + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&mut self, no: u32, buf: &[u8; BLOCK_SIZE]) -> FsResult<()> {
        let off = self.offset(no)?;
        self.blocks[off..off + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn block_count(&self) -> u32 {
        (self.blocks.len() / BLOCK_SIZE) as u32
    }
}
