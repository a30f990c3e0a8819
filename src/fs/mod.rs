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

//! The filesystem instance: on-medium format initialization, bitmap
//! management, inode table access and the inode cache.
//!
//! The on-medium layout is, in blocks: the superblock, the inode bitmap, the
//! data bitmap, the inode table, then the data region.

pub mod dirent;
pub mod inode;
pub mod superblock;

use crate::device::BLOCK_SIZE;
use crate::driver::{zeroed_block, Block, BlockDriver};
use crate::error::{FsError, FsResult};
use crate::fs::dirent::Dirent;
use crate::fs::inode::{FileType, Inode, RawInode, INODE_SIZE};
use crate::fs::superblock::{Bitmap, Superblock, SLOWFS_MAGIC};
use crate::util::{ceil_division, read_record, reinterpret};
use log::{debug, info};
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::size_of;
use std::rc::Rc;

/// The inode number of the root directory.
pub const ROOT_INO: u32 = 1;

/// Returns the default number of inode slots for a volume of `num_blocks`
/// blocks: one slot per block, plus headroom.
pub fn default_inode_count(num_blocks: u32) -> u32 {
    num_blocks + num_blocks / 4
}

/// A mounted filesystem instance.
///
/// The instance pins every inode it has loaded until it is dropped; dropping
/// the last reference releases the backing device.
pub struct SlowFs {
    /// The driver mediating all block I/O.
    driver: RefCell<BlockDriver>,
    /// The decoded superblock.
    sb: Superblock,
    /// The inode allocation bitmap; bit `n` covers inode slot `n`.
    inode_bitmap: RefCell<Bitmap>,
    /// The data allocation bitmap; bit `n` covers block
    /// `data_region_start + n`.
    data_bitmap: RefCell<Bitmap>,
    /// The inode cache, single owner of the in-memory inodes.
    inodes: RefCell<HashMap<u32, Rc<Inode>>>,
}

impl SlowFs {
    /// Formats the volume behind `driver`.
    ///
    /// Writes the superblock, clears both bitmaps and the inode table, then
    /// creates the root directory (inode [`ROOT_INO`]) holding its `.` and
    /// `..` entries.
    pub fn format(driver: &mut BlockDriver, num_inodes: u32) -> FsResult<()> {
        let num_blocks = driver.block_count();
        let bits_per_block = (BLOCK_SIZE * 8) as u32;
        let inode_bitmap_blocks = ceil_division(num_inodes, bits_per_block);
        let data_bitmap_blocks = ceil_division(num_blocks, bits_per_block);
        let inode_table_blocks =
            (num_inodes as u64 * INODE_SIZE as u64).div_ceil(BLOCK_SIZE as u64) as u32;
        let sb = Superblock {
            magic: SLOWFS_MAGIC,
            block_size: BLOCK_SIZE as u32,
            num_blocks,
            inode_bitmap_start: 1,
            data_bitmap_start: 1 + inode_bitmap_blocks,
            inode_table_start: 1 + inode_bitmap_blocks + data_bitmap_blocks,
            data_region_start: 1
                + inode_bitmap_blocks
                + data_bitmap_blocks
                + inode_table_blocks,
            num_inodes,
        };
        if sb.data_region_start >= num_blocks || num_inodes < 2 {
            return Err(FsError::NoSpace);
        }
        sb.write(driver)?;
        // clear the bitmaps and the inode table
        let zero = zeroed_block();
        for no in 1..sb.data_region_start {
            driver.bwrite(no, &zero)?;
        }
        // mark the reserved slot 0 and the root inode
        let mut inode_bitmap = Bitmap::new(num_inodes);
        inode_bitmap.set(0);
        inode_bitmap.set(ROOT_INO);
        write_bitmap(driver, sb.inode_bitmap_start, inode_bitmap_blocks, &inode_bitmap)?;
        // the root directory takes the first data block
        let mut data_bitmap = Bitmap::new(sb.data_blocks());
        data_bitmap.set(0);
        write_bitmap(driver, sb.data_bitmap_start, data_bitmap_blocks, &data_bitmap)?;
        let root_blk = sb.data_region_start;
        // root inode: allocation, `.` and its own `..` each count a link
        let mut raw = RawInode::new(FileType::Directory);
        raw.size = 2 * size_of::<Dirent>() as u32;
        raw.link_count = 3;
        raw.direct[0] = root_blk;
        let mut blk = zeroed_block();
        blk[INODE_SIZE..2 * INODE_SIZE].copy_from_slice(reinterpret(&raw));
        driver.bwrite(sb.inode_table_start, &blk)?;
        // the root directory's entry block
        let mut blk = zeroed_block();
        let dot = Dirent::new(ROOT_INO, ".");
        let dotdot = Dirent::new(ROOT_INO, "..");
        blk[..size_of::<Dirent>()].copy_from_slice(reinterpret(&dot));
        blk[size_of::<Dirent>()..2 * size_of::<Dirent>()].copy_from_slice(reinterpret(&dotdot));
        driver.bwrite(root_blk, &blk)?;
        info!("formatted volume: {num_blocks} blocks, {num_inodes} inodes");
        Ok(())
    }

    /// Mounts the filesystem behind `driver`.
    ///
    /// Reads and validates the superblock, loads both bitmaps and pins the
    /// root inode in the cache.
    pub fn mount(mut driver: BlockDriver) -> FsResult<Rc<Self>> {
        let sb = Superblock::read(&mut driver)?;
        let inode_bitmap = read_bitmap(
            &mut driver,
            sb.inode_bitmap_start,
            sb.data_bitmap_start - sb.inode_bitmap_start,
            sb.num_inodes,
        )?;
        let data_bitmap = read_bitmap(
            &mut driver,
            sb.data_bitmap_start,
            sb.inode_table_start - sb.data_bitmap_start,
            sb.data_blocks(),
        )?;
        let fs = Rc::new(Self {
            driver: RefCell::new(driver),
            sb,
            inode_bitmap: RefCell::new(inode_bitmap),
            data_bitmap: RefCell::new(data_bitmap),
            inodes: RefCell::new(HashMap::new()),
        });
        fs.get_inode(ROOT_INO)?;
        info!(
            "mounted volume: {} blocks, {} inodes",
            fs.sb.num_blocks, fs.sb.num_inodes
        );
        Ok(fs)
    }

    /// Returns the decoded superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Returns the root directory's inode.
    pub fn root_inode(&self) -> FsResult<Rc<Inode>> {
        self.get_inode(ROOT_INO)
    }

    /// Returns the in-memory inode `ino`, reading it from the table on first
    /// access.
    ///
    /// A loaded inode stays pinned in the cache until unmount.
    pub fn get_inode(&self, ino: u32) -> FsResult<Rc<Inode>> {
        if let Some(inode) = self.inodes.borrow().get(&ino) {
            return Ok(inode.clone());
        }
        let raw = self.read_inode(ino)?;
        let kind = FileType::try_from(raw.kind)?;
        let inode = Rc::new(Inode::new(ino, kind, raw));
        self.inodes.borrow_mut().insert(ino, inode.clone());
        Ok(inode)
    }

    /// Allocates the lowest free inode slot and initializes it with the
    /// given kind.
    pub fn alloc_inode(&self, kind: FileType) -> FsResult<Rc<Inode>> {
        let ino = self
            .inode_bitmap
            .borrow_mut()
            .alloc()
            .ok_or(FsError::NoSpace)?;
        self.flush_bitmap_block(self.sb.inode_bitmap_start, &self.inode_bitmap, ino)?;
        let raw = RawInode::new(kind);
        self.write_inode(ino, &raw)?;
        let inode = Rc::new(Inode::new(ino, kind, raw));
        self.inodes.borrow_mut().insert(ino, inode.clone());
        debug!("allocated inode {ino}");
        Ok(inode)
    }

    /// Allocates the lowest free data block and zeroes it.
    ///
    /// Both the bitmap bit and the zeroed block are persisted before the
    /// function returns, so the caller may link the block from an inode.
    pub fn alloc_block(&self) -> FsResult<u32> {
        let bit = self
            .data_bitmap
            .borrow_mut()
            .alloc()
            .ok_or(FsError::NoSpace)?;
        self.flush_bitmap_block(self.sb.data_bitmap_start, &self.data_bitmap, bit)?;
        let no = self.sb.data_region_start + bit;
        self.bwrite(no, &zeroed_block())?;
        debug!("allocated block {no}");
        Ok(no)
    }

    /// Reads inode `ino`'s packed record from the inode table.
    pub fn read_inode(&self, ino: u32) -> FsResult<RawInode> {
        let (blk_no, off) = self.inode_slot(ino)?;
        let blk = self.bread(blk_no)?;
        Ok(unsafe { read_record(&blk[off..off + INODE_SIZE]) })
    }

    /// Writes inode `ino`'s packed record: reads the host block, patches the
    /// slot, writes the block back.
    pub fn write_inode(&self, ino: u32, raw: &RawInode) -> FsResult<()> {
        let (blk_no, off) = self.inode_slot(ino)?;
        let mut blk = self.bread(blk_no)?;
        blk[off..off + INODE_SIZE].copy_from_slice(reinterpret(raw));
        self.bwrite(blk_no, &blk)
    }

    /// Tells whether inode slot `ino` is allocated.
    pub fn inode_in_use(&self, ino: u32) -> bool {
        ino < self.sb.num_inodes && self.inode_bitmap.borrow().is_set(ino)
    }

    /// Tells whether the data block `no` (an absolute block number) is
    /// allocated.
    pub fn block_in_use(&self, no: u32) -> bool {
        no >= self.sb.data_region_start
            && no < self.sb.num_blocks
            && self
                .data_bitmap
                .borrow()
                .is_set(no - self.sb.data_region_start)
    }

    /// Returns the number of allocated inode slots, slot 0 included.
    pub fn allocated_inodes(&self) -> u32 {
        self.inode_bitmap.borrow().count_set()
    }

    /// Returns the number of allocated data blocks.
    pub fn allocated_blocks(&self) -> u32 {
        self.data_bitmap.borrow().count_set()
    }

    /// Reads one block through the driver.
    pub(crate) fn bread(&self, no: u32) -> FsResult<Block> {
        self.driver.borrow_mut().bread(no)
    }

    /// Writes one block through the driver.
    pub(crate) fn bwrite(&self, no: u32, blk: &[u8; BLOCK_SIZE]) -> FsResult<()> {
        self.driver.borrow_mut().bwrite(no, blk)
    }

    /// Returns the table block and intra-block offset of inode `ino`.
    fn inode_slot(&self, ino: u32) -> FsResult<(u32, usize)> {
        if ino == 0 || ino >= self.sb.num_inodes {
            return Err(FsError::corrupted("inode number out of range"));
        }
        let per_block = (BLOCK_SIZE / INODE_SIZE) as u32;
        Ok((
            self.sb.inode_table_start + ino / per_block,
            (ino % per_block) as usize * INODE_SIZE,
        ))
    }

    /// Writes back the bitmap block containing bit `pos`.
    fn flush_bitmap_block(
        &self,
        region_start: u32,
        bitmap: &RefCell<Bitmap>,
        pos: u32,
    ) -> FsResult<()> {
        let rel_blk = pos as usize / 8 / BLOCK_SIZE;
        let mut blk = zeroed_block();
        let bitmap = bitmap.borrow();
        let bytes = bitmap.as_bytes();
        let start = rel_blk * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(bytes.len());
        blk[..end - start].copy_from_slice(&bytes[start..end]);
        self.bwrite(region_start + rel_blk as u32, &blk)
    }
}

/// Writes a whole bitmap region, zero-padding the last block.
fn write_bitmap(
    driver: &mut BlockDriver,
    start: u32,
    blocks: u32,
    bitmap: &Bitmap,
) -> FsResult<()> {
    let bytes = bitmap.as_bytes();
    for i in 0..blocks as usize {
        let mut blk = zeroed_block();
        let lo = i * BLOCK_SIZE;
        let hi = (lo + BLOCK_SIZE).min(bytes.len());
        if lo < hi {
            blk[..hi - lo].copy_from_slice(&bytes[lo..hi]);
        }
        driver.bwrite(start + i as u32, &blk)?;
    }
    Ok(())
}

/// Reads a whole bitmap region back.
fn read_bitmap(
    driver: &mut BlockDriver,
    start: u32,
    blocks: u32,
    len: u32,
) -> FsResult<Bitmap> {
    let mut bytes = Vec::with_capacity(blocks as usize * BLOCK_SIZE);
    for i in 0..blocks {
        bytes.extend_from_slice(&driver.bread(start + i)?[..]);
    }
    Ok(Bitmap::from_bytes(&bytes, len))
}
