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

//! The process abstraction: per-process file descriptors over the VFS.
//!
//! A file descriptor is a small integer index into the process's table,
//! pointing to an entry of the open-file table.

use crate::error::{FsError, FsResult, WriteResult};
use crate::fs::inode::Stat;
use crate::vfs::{OpenFile, Vfs};
use std::cell::RefCell;
use std::io::SeekFrom;
use std::rc::Rc;

/// The maximum number of open file descriptors per process.
pub const OPEN_MAX: usize = 1024;

/// A process, owner of a file-descriptor table.
///
/// The syscall surface is the [`Vfs`] value received at spawn; process code
/// depends on nothing else. The whole stack is single-threaded and
/// cooperative: every call runs to completion.
pub struct Process {
    /// The dispatcher, received at spawn.
    vfs: Rc<Vfs>,
    /// The descriptor table; `None` marks a free slot.
    fds: RefCell<Vec<Option<Rc<RefCell<OpenFile>>>>>,
    /// The working directory, fixed to the root.
    cwd: String,
}

impl Process {
    /// Spawns a process over the given syscall surface.
    pub fn spawn(vfs: Rc<Vfs>) -> Self {
        Self {
            vfs,
            fds: RefCell::new(Vec::new()),
            cwd: String::from("/"),
        }
    }

    /// Returns the process's working directory.
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Opens `path` and returns the lowest free file descriptor.
    pub fn open(&self, path: &str, flags: u32, mode: u32) -> FsResult<i32> {
        let mut fds = self.fds.borrow_mut();
        let fd = fds.iter().position(Option::is_none).unwrap_or(fds.len());
        if fd >= OPEN_MAX {
            return Err(FsError::NoSpace);
        }
        let file = self.vfs.open(path, flags, mode)?;
        if fd == fds.len() {
            fds.push(Some(file));
        } else {
            fds[fd] = Some(file);
        }
        Ok(fd as i32)
    }

    /// Closes `fd`, freeing its slot for reuse.
    pub fn close(&self, fd: i32) -> FsResult<()> {
        let idx = usize::try_from(fd).map_err(|_| FsError::BadFd)?;
        let mut fds = self.fds.borrow_mut();
        let file = fds
            .get_mut(idx)
            .and_then(Option::take)
            .ok_or(FsError::BadFd)?;
        // drop trailing free slots so the table stays small
        let len = fds
            .iter()
            .rposition(Option::is_some)
            .map(|i| i + 1)
            .unwrap_or(0);
        fds.truncate(len);
        drop(fds);
        self.vfs.close(&file)
    }

    /// Reads up to `count` bytes from `fd`.
    pub fn read(&self, fd: i32, count: usize) -> FsResult<Vec<u8>> {
        let file = self.get_fd(fd)?;
        self.vfs.read(&file, count)
    }

    /// Writes `data` to `fd`, returning the number of bytes written.
    pub fn write(&self, fd: i32, data: &[u8]) -> WriteResult {
        let file = self.get_fd(fd)?;
        self.vfs.write(&file, data)
    }

    /// Moves `fd`'s offset and returns the new value.
    pub fn seek(&self, fd: i32, pos: SeekFrom) -> FsResult<u64> {
        let file = self.get_fd(fd)?;
        self.vfs.seek(&file, pos)
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.vfs.mkdir(path, mode)
    }

    /// Reports the attributes of the file at `path`.
    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        self.vfs.getattr(path)
    }

    /// Lists the live entries of the directory at `path`, in on-medium
    /// order.
    pub fn listdir(&self, path: &str) -> FsResult<Vec<(String, u32)>> {
        self.vfs.readdir(path)
    }

    /// Looks a descriptor up, failing with [`FsError::BadFd`] on a free or
    /// out-of-range slot.
    fn get_fd(&self, fd: i32) -> FsResult<Rc<RefCell<OpenFile>>> {
        let idx = usize::try_from(fd).map_err(|_| FsError::BadFd)?;
        self.fds
            .borrow()
            .get(idx)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(FsError::BadFd)
    }
}
