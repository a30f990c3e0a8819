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

//! Inodes: the packed on-medium records and the in-memory objects operating
//! on them.
//!
//! An inode addresses its content through direct block pointers only. Byte
//! ranges are the public currency of `read`/`write`; block boundaries are a
//! private concern.

use crate::device::BLOCK_SIZE;
use crate::error::{FsError, FsResult, ShortWrite, WriteResult};
use crate::fs::dirent::{check_name, Dirent, DIRENT_SIZE};
use crate::fs::SlowFs;
use crate::util::{read_record, reinterpret};
use log::debug;
use std::cell::RefCell;
use std::mem::size_of;

/// The number of direct block pointers per inode.
pub const DIRECT_COUNT: usize = 60;
/// The size of a packed inode record in bytes.
pub const INODE_SIZE: usize = 256;
/// The maximum size of a file in bytes, with direct pointers only.
pub const MAX_FILE_SIZE: u64 = DIRECT_COUNT as u64 * BLOCK_SIZE as u64;

/// The kind of an inode.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    /// A regular file.
    Regular = 1,
    /// A directory.
    Directory = 2,
}

impl TryFrom<u8> for FileType {
    type Error = FsError;

    fn try_from(b: u8) -> FsResult<Self> {
        match b {
            1 => Ok(Self::Regular),
            2 => Ok(Self::Directory),
            _ => Err(FsError::corrupted("invalid inode kind")),
        }
    }
}

/// The on-medium inode record.
///
/// The inode number is implicit from the slot index in the inode table;
/// slot 0 is reserved.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawInode {
    /// The inode kind, a [`FileType`] value.
    pub kind: u8,
    _pad0: [u8; 3],
    /// The file length in bytes.
    pub size: u32,
    /// The number of directory entries referencing the inode.
    pub link_count: u16,
    _pad1: [u8; 2],
    /// Direct block numbers; `0` means "no block".
    pub direct: [u32; DIRECT_COUNT],
    _pad2: [u8; 4],
}

const _: () = assert!(size_of::<RawInode>() == INODE_SIZE);

impl RawInode {
    /// Returns a fresh record of the given kind.
    ///
    /// The link count starts at 1, accounting for the directory entry about
    /// to reference the inode.
    pub fn new(kind: FileType) -> Self {
        Self {
            kind: kind as u8,
            _pad0: [0; 3],
            size: 0,
            link_count: 1,
            _pad1: [0; 2],
            direct: [0; DIRECT_COUNT],
            _pad2: [0; 4],
        }
    }
}

/// Attributes reported for a file or directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stat {
    /// The file's kind.
    pub kind: FileType,
    /// The file's length in bytes.
    pub size: u64,
    /// The number of directory entries referencing the file.
    pub link_count: u16,
    /// The inode number.
    pub ino: u32,
}

/// An in-memory inode, pinned in its filesystem's cache for the life of the
/// mount.
///
/// Every metadata change is written through the driver before the call
/// returns.
pub struct Inode {
    /// The inode number.
    ino: u32,
    /// The kind, validated when the record was loaded.
    kind: FileType,
    /// The cached on-medium record.
    raw: RefCell<RawInode>,
}

impl Inode {
    pub(crate) fn new(ino: u32, kind: FileType, raw: RawInode) -> Self {
        Self {
            ino,
            kind,
            raw: RefCell::new(raw),
        }
    }

    /// Returns the inode number.
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// Returns the inode's kind.
    pub fn kind(&self) -> FileType {
        self.kind
    }

    /// Returns the file's length in bytes.
    pub fn size(&self) -> u64 {
        self.raw.borrow().size as u64
    }

    /// Returns the file's attributes.
    pub fn stat(&self) -> Stat {
        let raw = self.raw.borrow();
        Stat {
            kind: self.kind,
            size: raw.size as u64,
            link_count: raw.link_count,
            ino: self.ino,
        }
    }

    /// Returns a copy of the direct block pointers.
    pub fn direct(&self) -> [u32; DIRECT_COUNT] {
        self.raw.borrow().direct
    }

    /// Writes the cached record back to the inode table.
    fn flush(&self, fs: &SlowFs) -> FsResult<()> {
        fs.write_inode(self.ino, &self.raw.borrow())
    }

    /// Bumps the link count and writes the inode through.
    fn bump_link(&self, fs: &SlowFs) -> FsResult<()> {
        self.raw.borrow_mut().link_count += 1;
        self.flush(fs)
    }

    /// Reads up to `count` bytes at `offset`.
    ///
    /// Returns an empty buffer at or past end of file; holes read as zeros.
    pub fn read(&self, fs: &SlowFs, offset: u64, count: usize) -> FsResult<Vec<u8>> {
        if self.kind != FileType::Regular {
            return Err(FsError::IsDir);
        }
        self.read_bytes(fs, offset, count)
    }

    /// Writes `data` at `offset`, allocating blocks on first touch.
    ///
    /// A gap between the previous end of file and `offset` becomes a sparse
    /// hole: it reads as zeros and is only allocated when written. On
    /// failure, the bytes already written stay persisted and counted in the
    /// file's size; the returned [`ShortWrite`] carries their number.
    pub fn write(&self, fs: &SlowFs, offset: u64, data: &[u8]) -> WriteResult {
        if self.kind != FileType::Regular {
            return Err(FsError::IsDir.into());
        }
        self.write_bytes(fs, offset, data)
    }

    /// Resets the file to zero length, dropping all direct pointers.
    ///
    /// The data blocks are not reclaimed; only the pointers go away.
    pub fn truncate(&self, fs: &SlowFs) -> FsResult<()> {
        if self.kind != FileType::Regular {
            return Err(FsError::IsDir);
        }
        {
            let mut raw = self.raw.borrow_mut();
            raw.size = 0;
            raw.direct = [0; DIRECT_COUNT];
        }
        self.flush(fs)
    }

    /// Reads a byte range, without checking the inode kind.
    fn read_bytes(&self, fs: &SlowFs, offset: u64, count: usize) -> FsResult<Vec<u8>> {
        let size = self.size();
        if offset >= size {
            return Ok(Vec::new());
        }
        let end = size.min(offset.saturating_add(count as u64));
        let mut out = vec![0u8; (end - offset) as usize];
        let mut pos = offset;
        while pos < end {
            let blk_index = (pos / BLOCK_SIZE as u64) as usize;
            let blk_off = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - blk_off).min((end - pos) as usize);
            let blk_no = *self
                .raw
                .borrow()
                .direct
                .get(blk_index)
                .ok_or(FsError::corrupted("file size exceeds its direct pointers"))?;
            // an unallocated block reads as zeros, which the buffer already is
            if blk_no != 0 {
                let blk = fs.bread(blk_no)?;
                let dst = (pos - offset) as usize;
                out[dst..dst + chunk].copy_from_slice(&blk[blk_off..blk_off + chunk]);
            }
            pos += chunk as u64;
        }
        Ok(out)
    }

    /// Writes a byte range, without checking the inode kind.
    ///
    /// Progresses block by block; each block's data, any allocation and the
    /// matching size growth are persisted before the next block is touched.
    fn write_bytes(&self, fs: &SlowFs, offset: u64, data: &[u8]) -> WriteResult {
        let Some(end) = offset.checked_add(data.len() as u64) else {
            return Err(FsError::FileTooBig.into());
        };
        let mut written = 0usize;
        let mut pos = offset;
        while pos < end {
            let blk_index = (pos / BLOCK_SIZE as u64) as usize;
            if blk_index >= DIRECT_COUNT {
                return Err(ShortWrite {
                    written,
                    kind: FsError::FileTooBig,
                });
            }
            let blk_off = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - blk_off).min((end - pos) as usize);
            let mut blk_no = self.raw.borrow().direct[blk_index];
            if blk_no == 0 {
                // the bitmap bit and the zeroed block are persisted before
                // the pointer appears in the inode
                blk_no = match fs.alloc_block() {
                    Ok(no) => no,
                    Err(kind) => return Err(ShortWrite { written, kind }),
                };
                self.raw.borrow_mut().direct[blk_index] = blk_no;
                if let Err(kind) = self.flush(fs) {
                    return Err(ShortWrite { written, kind });
                }
            }
            // read-modify-write of the target block
            let mut blk = match fs.bread(blk_no) {
                Ok(blk) => blk,
                Err(kind) => return Err(ShortWrite { written, kind }),
            };
            blk[blk_off..blk_off + chunk].copy_from_slice(&data[written..written + chunk]);
            if let Err(kind) = fs.bwrite(blk_no, &blk) {
                return Err(ShortWrite { written, kind });
            }
            written += chunk;
            pos += chunk as u64;
            if pos > self.size() {
                self.raw.borrow_mut().size = pos as u32;
                if let Err(kind) = self.flush(fs) {
                    return Err(ShortWrite { written, kind });
                }
            }
        }
        Ok(written)
    }

    /// Loads the directory's entry array.
    fn load_dirents(&self, fs: &SlowFs) -> FsResult<Vec<Dirent>> {
        if self.kind != FileType::Directory {
            return Err(FsError::NotDir);
        }
        let size = self.size();
        if size % DIRENT_SIZE as u64 != 0 {
            return Err(FsError::corrupted("directory size is not entry-aligned"));
        }
        let data = self.read_bytes(fs, 0, size as usize)?;
        Ok(data
            .chunks_exact(DIRENT_SIZE)
            .map(|chunk| unsafe { read_record::<Dirent>(chunk) })
            .collect())
    }

    /// Looks `name` up among the directory's live entries, in on-medium
    /// order.
    pub fn lookup(&self, fs: &SlowFs, name: &str) -> FsResult<u32> {
        self.load_dirents(fs)?
            .iter()
            .find(|ent| !ent.is_free() && ent.name() == name)
            .map(|ent| ent.inode)
            .ok_or(FsError::NotFound)
    }

    /// Returns the live entries in on-medium order.
    pub fn entries(&self, fs: &SlowFs) -> FsResult<Vec<(String, u32)>> {
        Ok(self
            .load_dirents(fs)?
            .iter()
            .filter(|ent| !ent.is_free())
            .map(|ent| (ent.name().to_owned(), ent.inode))
            .collect())
    }

    /// Inserts an entry binding `name` to inode `ino`.
    ///
    /// The entry lands in the lowest free slot; when there is none, the
    /// directory grows by one entry, allocating a fresh block if needed.
    pub fn add_entry(&self, fs: &SlowFs, name: &str, ino: u32) -> FsResult<()> {
        check_name(name)?;
        let ents = self.load_dirents(fs)?;
        if ents.iter().any(|ent| !ent.is_free() && ent.name() == name) {
            return Err(FsError::Exists);
        }
        let slot = ents.iter().position(Dirent::is_free).unwrap_or(ents.len());
        let ent = Dirent::new(ino, name);
        // an entry never straddles a block: 32 divides the block size
        self.write_bytes(fs, slot as u64 * DIRENT_SIZE as u64, reinterpret(&ent))
            .map_err(|short| short.kind)?;
        Ok(())
    }

    /// Creates a child of the given kind under `name` in this directory.
    ///
    /// A directory child is initialized with its `.` and `..` entries before
    /// it becomes visible in the parent. A failure after the child inode was
    /// allocated leaves it allocated; its link count only reflects the
    /// references actually added.
    pub fn create(&self, fs: &SlowFs, name: &str, kind: FileType) -> FsResult<u32> {
        check_name(name)?;
        match self.lookup(fs, name) {
            Ok(_) => return Err(FsError::Exists),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }
        let child = fs.alloc_inode(kind)?;
        if kind == FileType::Directory {
            child.add_entry(fs, ".", child.ino())?;
            child.bump_link(fs)?;
            child.add_entry(fs, "..", self.ino())?;
            self.bump_link(fs)?;
        }
        self.add_entry(fs, name, child.ino())?;
        debug!("created {kind:?} `{name}` as inode {}", child.ino());
        Ok(child.ino())
    }
}
