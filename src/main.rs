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

//! The `slowfs` tool creates and inspects slowfs images.
//!
//! The image is mounted under `/mnt` of a fresh VFS, so every command walks
//! the whole stack: process, VFS, filesystem, driver, device.

use slowfs::device::{BlockDevice, FileDevice, BLOCK_SIZE};
use slowfs::driver::BlockDriver;
use slowfs::error::FsResult;
use slowfs::fs::inode::FileType;
use slowfs::fs::{default_inode_count, SlowFs};
use slowfs::process::Process;
use slowfs::vfs::{Vfs, O_CREAT, O_RDONLY, O_TRUNC, O_WRONLY};
use std::env;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::exit;

/// The path the image is mounted to.
const MOUNT_PATH: &str = "/mnt";

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("slowfs: error: {msg}");
    exit(1);
}

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" slowfs mkfs <image> [blocks]");
    eprintln!(" slowfs info <image>");
    eprintln!(" slowfs stat <image> <path>");
    eprintln!(" slowfs ls <image> <path>");
    eprintln!(" slowfs mkdir <image> <path>");
    eprintln!(" slowfs cat <image> <path>");
    eprintln!(" slowfs write <image> <path>");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" image:\tthe path to the image file or block device");
    eprintln!(" blocks:\tthe size of the volume in 4096-byte blocks");
    eprintln!(" path:\tan absolute path inside the image");
    eprintln!();
    eprintln!("`write` reads the file's new content from the standard input.");
}

/// Creates a filesystem on `image`.
///
/// Without an explicit block count, the volume spans the whole file or
/// device.
fn do_mkfs(image: &Path, blocks: Option<u32>) -> FsResult<()> {
    let dev = match blocks {
        Some(blocks) => FileDevice::create(image, blocks)?,
        // the existing file or device provides the volume size
        None => FileDevice::open(image)?,
    };
    let block_count = dev.block_count();
    let mut driver = BlockDriver::new(Box::new(dev));
    SlowFs::format(&mut driver, default_inode_count(block_count))?;
    println!("created a {block_count}-block volume on {}", image.display());
    Ok(())
}

/// Prints the superblock and allocation counters of `image`.
fn do_info(image: &Path) -> FsResult<()> {
    let dev = FileDevice::open(image)?;
    let fs = SlowFs::mount(BlockDriver::new(Box::new(dev)))?;
    let sb = fs.superblock();
    println!("magic:             {:#010x}", sb.magic);
    println!("block size:        {}", sb.block_size);
    println!("blocks:            {}", sb.num_blocks);
    println!("inode bitmap at:   {}", sb.inode_bitmap_start);
    println!("data bitmap at:    {}", sb.data_bitmap_start);
    println!("inode table at:    {}", sb.inode_table_start);
    println!("data region at:    {}", sb.data_region_start);
    println!("inodes:            {}", sb.num_inodes);
    println!("inodes in use:     {}", fs.allocated_inodes());
    println!("data blocks in use: {}", fs.allocated_blocks());
    Ok(())
}

/// Mounts `image` under [`MOUNT_PATH`] and spawns a process on the VFS.
fn mount_image(image: &Path) -> FsResult<Process> {
    let dev = FileDevice::open(image)?;
    let fs = SlowFs::mount(BlockDriver::new(Box::new(dev)))?;
    let vfs = Vfs::new()?;
    vfs.mkdir(MOUNT_PATH, 0o755)?;
    vfs.mount(MOUNT_PATH, fs)?;
    Ok(Process::spawn(vfs))
}

/// Maps a user path to its location under the mount point.
fn image_path(path: &str) -> String {
    format!("{MOUNT_PATH}{path}")
}

fn do_stat(image: &Path, path: &str) -> FsResult<()> {
    let proc = mount_image(image)?;
    let stat = proc.stat(&image_path(path))?;
    let kind = match stat.kind {
        FileType::Regular => "regular file",
        FileType::Directory => "directory",
    };
    println!("{path}: {kind}, {} bytes, {} links, inode {}", stat.size, stat.link_count, stat.ino);
    Ok(())
}

fn do_ls(image: &Path, path: &str) -> FsResult<()> {
    let proc = mount_image(image)?;
    for (name, ino) in proc.listdir(&image_path(path))? {
        println!("{ino}\t{name}");
    }
    Ok(())
}

fn do_mkdir(image: &Path, path: &str) -> FsResult<()> {
    let proc = mount_image(image)?;
    proc.mkdir(&image_path(path), 0o755)
}

fn do_cat(image: &Path, path: &str) -> FsResult<()> {
    let proc = mount_image(image)?;
    let fd = proc.open(&image_path(path), O_RDONLY, 0)?;
    loop {
        let chunk = proc.read(fd, BLOCK_SIZE)?;
        if chunk.is_empty() {
            break;
        }
        io::stdout().write_all(&chunk)?;
    }
    proc.close(fd)
}

fn do_write(image: &Path, path: &str) -> FsResult<()> {
    let mut data = Vec::new();
    io::stdin().read_to_end(&mut data)?;
    let proc = mount_image(image)?;
    let fd = proc.open(&image_path(path), O_CREAT | O_WRONLY | O_TRUNC, 0o644)?;
    match proc.write(fd, &data) {
        Ok(n) => println!("wrote {n} bytes"),
        Err(short) => {
            proc.close(fd)?;
            error(short);
        }
    }
    proc.close(fd)
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().skip(1).collect();
    let res = match args
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .as_slice()
    {
        ["mkfs", image] => do_mkfs(Path::new(image), None),
        ["mkfs", image, blocks] => {
            let blocks = blocks
                .parse()
                .unwrap_or_else(|_| error("invalid block count"));
            do_mkfs(Path::new(image), Some(blocks))
        }
        ["info", image] => do_info(Path::new(image)),
        ["stat", image, path] => do_stat(Path::new(image), path),
        ["ls", image, path] => do_ls(Path::new(image), path),
        ["mkdir", image, path] => do_mkdir(Path::new(image), path),
        ["cat", image, path] => do_cat(Path::new(image), path),
        ["write", image, path] => do_write(Path::new(image), path),
        ["-h" | "--help"] => {
            print_usage();
            exit(0);
        }
        _ => {
            print_usage();
            exit(1);
        }
    };
    if let Err(e) = res {
        error(e);
    }
}
