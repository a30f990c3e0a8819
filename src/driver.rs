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

//! The block driver mediates every transfer between the filesystem and its
//! device.
//!
//! Higher layers never talk to the device directly: keeping this boundary
//! allows inserting a scheduler, a cache or request merging without touching
//! the filesystem.

use crate::device::{BlockDevice, BLOCK_SIZE};
use crate::error::FsResult;
use log::trace;

/// A block-sized buffer.
pub type Block = Box<[u8; BLOCK_SIZE]>;

/// Returns a zeroed block buffer.
pub fn zeroed_block() -> Block {
    Box::new([0u8; BLOCK_SIZE])
}

/// The driver in front of a block device.
pub struct BlockDriver {
    dev: Box<dyn BlockDevice>,
}

impl BlockDriver {
    /// Creates a driver for the given device.
    pub fn new(dev: Box<dyn BlockDevice>) -> Self {
        Self { dev }
    }

    /// Reads block `no` from the device.
    pub fn bread(&mut self, no: u32) -> FsResult<Block> {
        trace!("bread block={no}");
        let mut buf = zeroed_block();
        self.dev.read_block(no, &mut buf)?;
        Ok(buf)
    }

    /// Writes `buf` to block `no` on the device.
    // TODO merge adjacent requests once a write-back cache sits behind this
    pub fn bwrite(&mut self, no: u32, buf: &[u8; BLOCK_SIZE]) -> FsResult<()> {
        trace!("bwrite block={no}");
        self.dev.write_block(no, buf)
    }

    /// Returns the number of blocks of the underlying device.
    pub fn block_count(&self) -> u32 {
        self.dev.block_count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::MemDevice;

    #[test]
    fn driver_forwards() {
        let mut driver = BlockDriver::new(Box::new(MemDevice::new(3)));
        assert_eq!(driver.block_count(), 3);
        let mut blk = zeroed_block();
        blk[42] = 0x42;
        driver.bwrite(1, &blk).unwrap();
        assert_eq!(driver.bread(1).unwrap()[42], 0x42);
        assert!(driver.bread(3).is_err());
    }
}
