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

//! End-to-end scenarios over the whole stack: process, VFS, filesystem,
//! driver, device.

use slowfs::device::{FileDevice, MemDevice, BLOCK_SIZE};
use slowfs::driver::BlockDriver;
use slowfs::error::FsError;
use slowfs::fs::inode::{FileType, MAX_FILE_SIZE};
use slowfs::fs::{default_inode_count, SlowFs, ROOT_INO};
use slowfs::process::Process;
use slowfs::vfs::{Vfs, O_CREAT, O_RDONLY, O_RDWR, O_WRONLY};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::rc::Rc;
use std::{env, fs};

/// The image's mount point in the test VFS.
const MNT: &str = "/mnt";

/// Returns the path of a private temporary image file.
fn temp_image(name: &str) -> PathBuf {
    let path = env::temp_dir().join(format!("slowfs-{}-{name}.img", std::process::id()));
    let _ = fs::remove_file(&path);
    path
}

/// Formats a 64-block volume on an in-memory device and mounts it.
fn new_volume() -> Rc<SlowFs> {
    volume_with_blocks(64)
}

/// Formats a volume of the given size on an in-memory device and mounts it.
fn volume_with_blocks(blocks: u32) -> Rc<SlowFs> {
    let mut driver = BlockDriver::new(Box::new(MemDevice::new(blocks)));
    SlowFs::format(&mut driver, default_inode_count(blocks)).unwrap();
    SlowFs::mount(driver).unwrap()
}

/// Builds the full stack: a VFS with the given volume at [`MNT`], and a
/// process on top.
fn new_stack(volume: Rc<SlowFs>) -> (Rc<Vfs>, Process) {
    let vfs = Vfs::new().unwrap();
    vfs.mkdir(MNT, 0o755).unwrap();
    vfs.mount(MNT, volume).unwrap();
    let proc = Process::spawn(vfs.clone());
    (vfs, proc)
}

/// Prefixes `path` with the mount point.
fn p(path: &str) -> String {
    format!("{MNT}{path}")
}

#[test]
fn fresh_root_attributes() {
    let (_vfs, proc) = new_stack(new_volume());
    let stat = proc.stat(MNT).unwrap();
    assert_eq!(stat.kind, FileType::Directory);
    // two 32-byte entries: `.` and `..`
    assert_eq!(stat.size, 64);
    assert!(stat.link_count >= 1);
    assert_eq!(stat.ino, ROOT_INO);
}

#[test]
fn mkdir_then_listings() {
    let (_vfs, proc) = new_stack(new_volume());
    proc.mkdir(&p("/d"), 0o755).unwrap();
    let names: Vec<_> = proc
        .listdir(MNT)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, [".", "..", "d"]);
    let names: Vec<_> = proc
        .listdir(&p("/d"))
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, [".", ".."]);
    // creating the same directory twice fails with Exists
    assert!(matches!(
        proc.mkdir(&p("/d"), 0o755),
        Err(FsError::Exists)
    ));
}

#[test]
fn write_seek_read_stat() {
    let (_vfs, proc) = new_stack(new_volume());
    let fd = proc.open(&p("/f"), O_CREAT | O_RDWR, 0o644).unwrap();
    assert_eq!(proc.write(fd, b"Hello").unwrap(), 5);
    assert_eq!(proc.write(fd, b" world").unwrap(), 6);
    proc.seek(fd, SeekFrom::Start(0)).unwrap();
    assert_eq!(proc.read(fd, 11).unwrap(), b"Hello world");
    proc.close(fd).unwrap();
    assert_eq!(proc.stat(&p("/f")).unwrap().size, 11);
}

#[test]
fn straddling_write_allocates_two_blocks() {
    let volume = new_volume();
    let (_vfs, proc) = new_stack(volume.clone());
    proc.mkdir(&p("/d"), 0o755).unwrap();
    let fd = proc.open(&p("/d/g"), O_CREAT | O_WRONLY, 0o644).unwrap();
    let data = vec![b'x'; BLOCK_SIZE + 1];
    assert_eq!(proc.write(fd, &data).unwrap(), BLOCK_SIZE + 1);
    proc.close(fd).unwrap();
    let stat = proc.stat(&p("/d/g")).unwrap();
    assert_eq!(stat.size, BLOCK_SIZE as u64 + 1);
    // exactly two data blocks back the file
    let inode = volume.get_inode(stat.ino).unwrap();
    let backed: Vec<u32> = inode
        .direct()
        .iter()
        .copied()
        .filter(|no| *no != 0)
        .collect();
    assert_eq!(backed.len(), 2);
    for no in backed {
        assert!(volume.block_in_use(no));
    }
}

#[test]
fn remount_reproduces_everything() {
    let image = temp_image("persist");
    {
        let dev = FileDevice::create(&image, 64).unwrap();
        let mut driver = BlockDriver::new(Box::new(dev));
        SlowFs::format(&mut driver, default_inode_count(64)).unwrap();
        let volume = SlowFs::mount(driver).unwrap();
        let (_vfs, proc) = new_stack(volume);
        proc.mkdir(&p("/d"), 0o755).unwrap();
        let fd = proc.open(&p("/f"), O_CREAT | O_RDWR, 0o644).unwrap();
        proc.write(fd, b"Hello").unwrap();
        proc.write(fd, b" world").unwrap();
        proc.close(fd).unwrap();
        // dropping the stack releases the backing file
    }
    let dev = FileDevice::open(&image).unwrap();
    let volume = SlowFs::mount(BlockDriver::new(Box::new(dev))).unwrap();
    let (_vfs, proc) = new_stack(volume);
    let names: Vec<_> = proc
        .listdir(MNT)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, [".", "..", "d", "f"]);
    assert_eq!(proc.stat(&p("/f")).unwrap().size, 11);
    let fd = proc.open(&p("/f"), O_RDONLY, 0).unwrap();
    assert_eq!(proc.read(fd, 11).unwrap(), b"Hello world");
    proc.close(fd).unwrap();
    let _ = fs::remove_file(&image);
}

#[test]
fn oversized_write_stops_at_the_limit() {
    // the volume must hold all 60 direct blocks so the write hits the size
    // limit before it can run out of space
    let (_vfs, proc) = new_stack(volume_with_blocks(80));
    let fd = proc.open(&p("/big"), O_CREAT | O_WRONLY, 0o644).unwrap();
    let data = vec![0u8; MAX_FILE_SIZE as usize + 1];
    let err = proc.write(fd, &data).unwrap_err();
    assert_eq!(err.written, MAX_FILE_SIZE as usize);
    assert!(matches!(err.kind, FsError::FileTooBig));
    proc.close(fd).unwrap();
    assert_eq!(proc.stat(&p("/big")).unwrap().size, MAX_FILE_SIZE);
}

#[test]
fn max_size_write_succeeds() {
    let (_vfs, proc) = new_stack(new_volume());
    let fd = proc.open(&p("/max"), O_CREAT | O_WRONLY, 0o644).unwrap();
    // a 64-block volume cannot hold 60 blocks of content plus metadata, so
    // write a sparse tail instead: the last byte of the largest legal file
    proc.seek(fd, SeekFrom::Start(MAX_FILE_SIZE - 1)).unwrap();
    assert_eq!(proc.write(fd, b"z").unwrap(), 1);
    proc.close(fd).unwrap();
    assert_eq!(proc.stat(&p("/max")).unwrap().size, MAX_FILE_SIZE);
}

#[test]
fn sparse_file_reads_zeros() {
    let (_vfs, proc) = new_stack(new_volume());
    let fd = proc.open(&p("/sparse"), O_CREAT | O_RDWR, 0o644).unwrap();
    let hole = 10 * BLOCK_SIZE as u64;
    proc.seek(fd, SeekFrom::Start(hole)).unwrap();
    proc.write(fd, b"x").unwrap();
    proc.seek(fd, SeekFrom::Start(0)).unwrap();
    let data = proc.read(fd, hole as usize + 1).unwrap();
    assert_eq!(data.len(), hole as usize + 1);
    assert!(data[..hole as usize].iter().all(|b| *b == 0));
    assert_eq!(data[hole as usize], b'x');
    proc.close(fd).unwrap();
    assert_eq!(proc.stat(&p("/sparse")).unwrap().size, hole + 1);
}

#[test]
fn filename_boundaries() {
    let (_vfs, proc) = new_stack(new_volume());
    proc.mkdir(&p("/a"), 0o755).unwrap();
    proc.mkdir(&p(&format!("/{}", "n".repeat(27))), 0o755).unwrap();
    assert!(matches!(
        proc.mkdir(&p(&format!("/{}", "n".repeat(28))), 0o755),
        Err(FsError::NameInvalid)
    ));
    assert!(matches!(
        proc.mkdir(&p("/caf\u{e9}"), 0o755),
        Err(FsError::NameInvalid)
    ));
    // a slash cannot appear in a name: it splits the path instead
    assert!(matches!(
        proc.mkdir(&p("/no/where"), 0o755),
        Err(FsError::NotFound)
    ));
}

#[test]
fn fd_numbers_are_reused_after_close() {
    let (_vfs, proc) = new_stack(new_volume());
    let a = proc.open(&p("/a"), O_CREAT | O_RDWR, 0o644).unwrap();
    let b = proc.open(&p("/b"), O_CREAT | O_RDWR, 0o644).unwrap();
    proc.close(a).unwrap();
    let c = proc.open(&p("/c"), O_CREAT | O_RDWR, 0o644).unwrap();
    assert_eq!(c, a);
    // the old value now names the new file, and the closed one stays dead
    assert!(matches!(proc.read(b, 0), Ok(_)));
    proc.close(b).unwrap();
    proc.close(c).unwrap();
    assert!(matches!(proc.read(a, 1), Err(FsError::BadFd)));
}

/// Walks the volume and checks the §8-style cross-structure invariants:
/// allocated inodes are referenced and alive, every pointed-to block is
/// marked in the data bitmap, and no block is shared between files.
#[test]
fn structural_invariants_hold() {
    let volume = new_volume();
    let (_vfs, proc) = new_stack(volume.clone());
    proc.mkdir(&p("/d"), 0o755).unwrap();
    proc.mkdir(&p("/d/e"), 0o755).unwrap();
    for (i, name) in ["x", "y", "z"].iter().enumerate() {
        let fd = proc
            .open(&p(&format!("/d/{name}")), O_CREAT | O_WRONLY, 0o644)
            .unwrap();
        proc.write(fd, &vec![i as u8; BLOCK_SIZE * (i + 1)]).unwrap();
        proc.close(fd).unwrap();
    }
    // collect every reachable inode from the volume's root
    let mut stack = vec![ROOT_INO];
    let mut seen_inodes = Vec::new();
    let mut seen_blocks = Vec::new();
    while let Some(ino) = stack.pop() {
        if seen_inodes.contains(&ino) {
            continue;
        }
        seen_inodes.push(ino);
        let inode = volume.get_inode(ino).unwrap();
        // invariant 1: allocated and alive
        assert!(volume.inode_in_use(ino));
        assert!(inode.stat().link_count >= 1);
        // invariant 2: every pointed-to block is allocated and unshared
        for no in inode.direct().iter().copied().filter(|no| *no != 0) {
            assert!(volume.block_in_use(no), "block {no} not in bitmap");
            assert!(!seen_blocks.contains(&no), "block {no} referenced twice");
            seen_blocks.push(no);
        }
        if inode.kind() == FileType::Directory {
            let listed = inode.entries(&volume).unwrap();
            // invariant 3: `.` and `..` come first, no duplicate names
            assert_eq!(listed[0].0, ".");
            assert_eq!(listed[1].0, "..");
            let mut names: Vec<_> = listed.iter().map(|(name, _)| name.clone()).collect();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), listed.len());
            for (name, ino) in listed {
                if name != "." && name != ".." {
                    stack.push(ino);
                }
            }
        }
    }
}

#[test]
fn path_normalization() {
    let (_vfs, proc) = new_stack(new_volume());
    proc.mkdir(&p("/d"), 0o755).unwrap();
    // trailing and doubled slashes resolve to the same file
    assert_eq!(proc.stat(&p("/d/")).unwrap().ino, proc.stat(&p("/d")).unwrap().ino);
    assert_eq!(
        proc.stat(&p("//d//")).unwrap().ino,
        proc.stat(&p("/d")).unwrap().ino
    );
    // `.` and `..` are ordinary entries and resolve through lookup
    assert_eq!(proc.stat(&p("/d/.")).unwrap().ino, proc.stat(&p("/d")).unwrap().ino);
    assert_eq!(proc.stat(&p("/d/..")).unwrap().ino, ROOT_INO);
    assert!(matches!(proc.stat("relative"), Err(FsError::InvalidPath)));
}
