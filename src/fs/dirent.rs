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

//! Packed directory entries.

use crate::error::{FsError, FsResult};
use std::mem::size_of;
use std::str;

/// The maximum length of a file name in bytes.
///
/// The bound comes from the 32-byte entry layout; changing the entry size
/// must update it in lockstep.
pub const NAME_MAX: usize = 27;
/// The size of a packed directory entry in bytes.
pub const DIRENT_SIZE: usize = 32;

/// An on-medium directory entry.
///
/// A directory's data blocks are a dense array of these. An entry whose
/// `inode` is `0` is a free slot, reusable by a later insertion.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Dirent {
    /// The referenced inode number; `0` marks a free slot.
    pub inode: u32,
    /// The number of valid bytes in `name`.
    pub name_len: u8,
    /// The name, zero-padded.
    pub name: [u8; NAME_MAX],
}

const _: () = assert!(size_of::<Dirent>() == DIRENT_SIZE);

impl Dirent {
    /// Builds an entry binding `name` to inode `ino`.
    ///
    /// The name must have been validated with [`check_name`].
    pub fn new(ino: u32, name: &str) -> Self {
        let mut ent = Self {
            inode: ino,
            name_len: name.len() as u8,
            name: [0; NAME_MAX],
        };
        ent.name[..name.len()].copy_from_slice(name.as_bytes());
        ent
    }

    /// Tells whether the slot is free.
    pub fn is_free(&self) -> bool {
        self.inode == 0
    }

    /// Returns the entry's name.
    pub fn name(&self) -> &str {
        // names are validated to 7-bit ASCII before they are stored
        str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }
}

/// Checks a file name against the on-medium constraints: 1 to [`NAME_MAX`]
/// bytes of 7-bit printable ASCII, without `/`.
pub fn check_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(FsError::NameInvalid);
    }
    let printable = name
        .bytes()
        .all(|b| (0x20..=0x7e).contains(&b) && b != b'/');
    if !printable {
        return Err(FsError::NameInvalid);
    }
    Ok(())
}
