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

//! The VFS (Virtual FileSystem) aggregates every mounted filesystem into one
//! tree and dispatches path-based calls.
//!
//! To manipulate files, the VFS should be used instead of calling a
//! filesystem's operations directly. The VFS value handed to a process at
//! spawn is its whole syscall surface.

use crate::device::MemDevice;
use crate::driver::BlockDriver;
use crate::error::{FsError, FsResult, WriteResult};
use crate::fs::inode::{FileType, Inode, Stat};
use crate::fs::{SlowFs, default_inode_count};
use crate::util::split_path;
use log::{debug, info};
use std::cell::RefCell;
use std::io::SeekFrom;
use std::io;
use std::rc::Rc;

/// Open flag: read-only access.
pub const O_RDONLY: u32 = 0o0;
/// Open flag: write-only access.
pub const O_WRONLY: u32 = 0o1;
/// Open flag: read-write access.
pub const O_RDWR: u32 = 0o2;
/// Mask over the access-mode bits.
pub const O_ACCMODE: u32 = 0o3;
/// Open flag: create the file if it does not exist.
pub const O_CREAT: u32 = 0o100;
/// Open flag: with `O_CREAT`, fail if the file already exists.
pub const O_EXCL: u32 = 0o200;
/// Open flag: truncate the file to zero length if opened writable.
pub const O_TRUNC: u32 = 0o1000;
/// Open flag: start with the offset at the end of the file.
pub const O_APPEND: u32 = 0o2000;

/// The number of blocks of the in-memory rootfs volume.
const ROOTFS_BLOCKS: u32 = 16;

/// An open-file description, shared by every file descriptor that refers to
/// the same `open`.
pub struct OpenFile {
    /// The slot of the description in the open-file table.
    id: usize,
    /// The filesystem holding the file.
    fs: Rc<SlowFs>,
    /// The open inode.
    inode: Rc<Inode>,
    /// The current byte offset.
    offset: u64,
    /// Whether reads are permitted.
    readable: bool,
    /// Whether writes are permitted.
    writable: bool,
    /// The number of file descriptors referencing the description.
    ref_count: u32,
}

impl OpenFile {
    /// Returns the current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the open inode's attributes.
    pub fn stat(&self) -> Stat {
        self.inode.stat()
    }
}

/// A mounted filesystem and the absolute path carrying it.
struct Mount {
    /// The components of the mount path; empty for the root.
    path: Vec<String>,
    /// The mounted instance.
    fs: Rc<SlowFs>,
}

/// The dispatcher routing path-based operations to mounted filesystems.
///
/// Holds the mount table and the process-wide open-file table.
pub struct Vfs {
    /// The mount table, in mount order. The first entry is always the
    /// rootfs.
    mounts: RefCell<Vec<Mount>>,
    /// The open-file table.
    table: RefCell<Vec<Option<Rc<RefCell<OpenFile>>>>>,
}

impl Vfs {
    /// Creates a VFS with a trivial in-memory rootfs mounted at `/`.
    ///
    /// The rootfs' sole purpose is to carry mount points as directory
    /// entries.
    pub fn new() -> FsResult<Rc<Self>> {
        let mut driver = BlockDriver::new(Box::new(MemDevice::new(ROOTFS_BLOCKS)));
        SlowFs::format(&mut driver, default_inode_count(ROOTFS_BLOCKS))?;
        let rootfs = SlowFs::mount(driver)?;
        Ok(Rc::new(Self {
            mounts: RefCell::new(vec![Mount {
                path: Vec::new(),
                fs: rootfs,
            }]),
            table: RefCell::new(Vec::new()),
        }))
    }

    /// Mounts `fs` at `path`, which must already exist as a directory in the
    /// containing filesystem.
    ///
    /// Subsequent resolutions whose prefix is `path` route into `fs`.
    pub fn mount(&self, path: &str, fs: Rc<SlowFs>) -> FsResult<()> {
        let comps: Vec<String> = split_path(path)?
            .into_iter()
            .map(str::to_owned)
            .collect();
        let (_, inode) = self.resolve(path)?;
        if inode.kind() != FileType::Directory {
            return Err(FsError::NotDir);
        }
        let mut mounts = self.mounts.borrow_mut();
        if mounts.iter().any(|mount| mount.path == comps) {
            return Err(FsError::Exists);
        }
        info!("mount {path}");
        mounts.push(Mount { path: comps, fs });
        Ok(())
    }

    /// Returns the mount path of `fs`, if mounted.
    pub fn mount_path(&self, fs: &Rc<SlowFs>) -> Option<String> {
        self.mounts
            .borrow()
            .iter()
            .find(|mount| Rc::ptr_eq(&mount.fs, fs))
            .map(|mount| {
                if mount.path.is_empty() {
                    "/".to_owned()
                } else {
                    format!("/{}", mount.path.join("/"))
                }
            })
    }

    /// Returns the most specific mounted filesystem for `comps`, along with
    /// the components left to walk inside it.
    fn mount_for<'c>(&self, comps: &'c [&'c str]) -> (Rc<SlowFs>, &'c [&'c str]) {
        let mounts = self.mounts.borrow();
        // the rootfs matches every path, so a best match always exists
        let mut best = 0;
        for (i, mount) in mounts.iter().enumerate() {
            let len = mount.path.len();
            let matches = len <= comps.len()
                && mount
                    .path
                    .iter()
                    .map(String::as_str)
                    .eq(comps[..len].iter().copied());
            if matches && len >= mounts[best].path.len() {
                best = i;
            }
        }
        let skip = mounts[best].path.len();
        (mounts[best].fs.clone(), &comps[skip..])
    }

    /// Resolves `path` to its filesystem and inode.
    ///
    /// Every call re-walks from a mount root; nothing is cached.
    pub fn resolve(&self, path: &str) -> FsResult<(Rc<SlowFs>, Rc<Inode>)> {
        let comps = split_path(path)?;
        let (fs, rest) = self.mount_for(&comps);
        let mut cur = fs.root_inode()?;
        for comp in rest {
            if cur.kind() != FileType::Directory {
                return Err(FsError::NotDir);
            }
            let ino = cur.lookup(&fs, comp)?;
            cur = fs.get_inode(ino)?;
        }
        Ok((fs, cur))
    }

    /// Resolves the parent directory of `path`, returning it along with the
    /// final component.
    fn resolve_parent(&self, path: &str) -> FsResult<(Rc<SlowFs>, Rc<Inode>, String)> {
        let comps = split_path(path)?;
        let Some((name, parent_comps)) = comps.split_last() else {
            // the path is a mount root, which always exists
            return Err(FsError::Exists);
        };
        let (fs, rest) = self.mount_for(parent_comps);
        let mut cur = fs.root_inode()?;
        for comp in rest {
            if cur.kind() != FileType::Directory {
                return Err(FsError::NotDir);
            }
            let ino = cur.lookup(&fs, comp)?;
            cur = fs.get_inode(ino)?;
        }
        if cur.kind() != FileType::Directory {
            return Err(FsError::NotDir);
        }
        Ok((fs, cur, (*name).to_owned()))
    }

    /// Opens `path` and returns its open-file description.
    ///
    /// With `O_CREAT`, a missing final component is created as a regular
    /// file in the parent directory. The mode is accepted for API shape and
    /// ignored: permissions are out of scope.
    pub fn open(&self, path: &str, flags: u32, _mode: u32) -> FsResult<Rc<RefCell<OpenFile>>> {
        let acc = flags & O_ACCMODE;
        let readable = acc == O_RDONLY || acc == O_RDWR;
        let writable = acc == O_WRONLY || acc == O_RDWR;
        let (fs, inode) = match self.resolve(path) {
            Ok(found) => {
                if flags & (O_CREAT | O_EXCL) == O_CREAT | O_EXCL {
                    return Err(FsError::Exists);
                }
                found
            }
            Err(FsError::NotFound) if flags & O_CREAT != 0 => {
                let (fs, parent, name) = self.resolve_parent(path)?;
                let ino = parent.create(&fs, &name, FileType::Regular)?;
                let inode = fs.get_inode(ino)?;
                (fs, inode)
            }
            Err(e) => return Err(e),
        };
        if inode.kind() == FileType::Directory && writable {
            return Err(FsError::IsDir);
        }
        if flags & O_TRUNC != 0 && writable {
            inode.truncate(&fs)?;
        }
        let offset = if flags & O_APPEND != 0 { inode.size() } else { 0 };
        debug!("open {path} flags={flags:#o}");
        let mut table = self.table.borrow_mut();
        let id = table
            .iter()
            .position(Option::is_none)
            .unwrap_or(table.len());
        let file = Rc::new(RefCell::new(OpenFile {
            id,
            fs,
            inode,
            offset,
            readable,
            writable,
            ref_count: 1,
        }));
        if id == table.len() {
            table.push(Some(file.clone()));
        } else {
            table[id] = Some(file.clone());
        }
        Ok(file)
    }

    /// Reads up to `count` bytes at the description's offset, advancing it.
    pub fn read(&self, file: &Rc<RefCell<OpenFile>>, count: usize) -> FsResult<Vec<u8>> {
        let mut file = file.borrow_mut();
        if !file.readable {
            return Err(FsError::BadFd);
        }
        let buf = file.inode.read(&file.fs, file.offset, count)?;
        file.offset += buf.len() as u64;
        Ok(buf)
    }

    /// Writes `data` at the description's offset, advancing it by the number
    /// of bytes actually written, partial progress included.
    pub fn write(&self, file: &Rc<RefCell<OpenFile>>, data: &[u8]) -> WriteResult {
        let mut file = file.borrow_mut();
        if !file.writable {
            return Err(FsError::BadFd.into());
        }
        let res = file.inode.write(&file.fs, file.offset, data);
        let written = match &res {
            Ok(n) => *n,
            Err(short) => short.written,
        };
        file.offset += written as u64;
        res
    }

    /// Moves the description's offset and returns the new value.
    ///
    /// Seeking past the end of file is allowed; a seek before the start is
    /// rejected.
    pub fn seek(&self, file: &Rc<RefCell<OpenFile>>, pos: SeekFrom) -> FsResult<u64> {
        let mut file = file.borrow_mut();
        let new = match pos {
            SeekFrom::Start(off) => off,
            SeekFrom::Current(delta) => file
                .offset
                .checked_add_signed(delta)
                .ok_or_else(seek_range_error)?,
            SeekFrom::End(delta) => file
                .inode
                .size()
                .checked_add_signed(delta)
                .ok_or_else(seek_range_error)?,
        };
        file.offset = new;
        Ok(new)
    }

    /// Releases one reference to the description, removing it from the
    /// open-file table when the last one goes away.
    pub fn close(&self, file: &Rc<RefCell<OpenFile>>) -> FsResult<()> {
        let mut file = file.borrow_mut();
        if file.ref_count == 0 {
            return Err(FsError::BadFd);
        }
        file.ref_count -= 1;
        if file.ref_count == 0 {
            self.table.borrow_mut()[file.id] = None;
        }
        Ok(())
    }

    /// Creates a directory at `path`.
    ///
    /// The mode is accepted for API shape and ignored.
    pub fn mkdir(&self, path: &str, _mode: u32) -> FsResult<()> {
        let (fs, parent, name) = self.resolve_parent(path)?;
        parent.create(&fs, &name, FileType::Directory)?;
        Ok(())
    }

    /// Resolves `path` and reports its attributes.
    pub fn getattr(&self, path: &str) -> FsResult<Stat> {
        let (_, inode) = self.resolve(path)?;
        Ok(inode.stat())
    }

    /// Resolves `path` to a directory and returns its live entries in
    /// on-medium order.
    pub fn readdir(&self, path: &str) -> FsResult<Vec<(String, u32)>> {
        let (fs, inode) = self.resolve(path)?;
        inode.entries(&fs)
    }
}

/// Builds the error for an out-of-range seek.
fn seek_range_error() -> FsError {
    FsError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "seek out of range",
    ))
}
