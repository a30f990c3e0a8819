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

//! The error taxonomy of the filesystem stack.
//!
//! Errors are carried as tagged values and bubble up through the inode, VFS
//! and process layers without being retried.

use std::io;
use thiserror::Error;

/// An error raised by the filesystem stack.
#[derive(Debug, Error)]
pub enum FsError {
    /// A path component or directory entry does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// The entry to create already exists.
    #[error("file exists")]
    Exists,
    /// A directory operation was dispatched against a non-directory.
    #[error("not a directory")]
    NotDir,
    /// The operation does not apply to a directory.
    #[error("is a directory")]
    IsDir,
    /// The path is empty or not absolute.
    #[error("invalid path")]
    InvalidPath,
    /// The file name violates the length or charset rules.
    #[error("invalid file name")]
    NameInvalid,
    /// An allocation bitmap (or the FD table) is exhausted.
    #[error("no space left on device")]
    NoSpace,
    /// A write would require a block index past the last direct pointer.
    #[error("file too large")]
    FileTooBig,
    /// The file descriptor is unknown, closed, or lacks the required access
    /// mode.
    #[error("bad file descriptor")]
    BadFd,
    /// The device or driver failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Builds an [`FsError::Io`] flagging on-medium corruption.
    pub fn corrupted(msg: &'static str) -> Self {
        Self::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
    }
}

/// Result alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// A write that stopped before consuming its whole input.
///
/// The `written` bytes are already persisted and reflected in the file's
/// size; `kind` tells why writing stopped.
#[derive(Debug, Error)]
#[error("short write ({written} bytes written): {kind}")]
pub struct ShortWrite {
    /// The number of bytes persisted before the failure.
    pub written: usize,
    /// The reason writing stopped.
    pub kind: FsError,
}

impl From<FsError> for ShortWrite {
    fn from(kind: FsError) -> Self {
        Self { written: 0, kind }
    }
}

/// Result alias for write operations, which may make partial progress.
pub type WriteResult = Result<usize, ShortWrite>;
