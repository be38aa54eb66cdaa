/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Random access to the disk image.
//!
//! The [`Device`] is the exclusive owner of the image handle. Every read and
//! write of the engine goes through it, addressed either in raw bytes (for
//! the superblock, which lives at a fixed byte offset) or in blocks once the
//! block size is known.

use crate::error::Result;
use libc::ioctl;
use std::ffi::c_long;
use std::fs::{File, OpenOptions};
use std::io::{Error, Read, Seek, SeekFrom, Write};
use std::mem::{MaybeUninit, size_of, size_of_val};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::{fs, io, slice};

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
    };
}

/// ioctl command: Get size of disk in number of sectors.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// Returns the size in bytes of the device or image file at `path`.
pub fn storage_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::metadata(path)?;
    let file_type = metadata.file_type();
    if file_type.is_block_device() || file_type.is_char_device() {
        let dev = File::open(path)?;
        let mut size = 0u64;
        let ret = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(Error::last_os_error());
        }
        Ok(size)
    } else {
        Ok(metadata.len())
    }
}

/// A device holding an ext2 filesystem, either a plain image file or a block
/// device.
pub struct Device {
    /// The path the device was opened from.
    path: PathBuf,
    /// The open handle on the image.
    file: File,
    /// The size of a block in bytes.
    ///
    /// Set to the superblock's block size once the superblock has been read.
    block_size: u32,
}

impl Device {
    /// Opens the device at the given path for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            // Blocks cannot be addressed before the superblock has been
            // decoded. `1024` is only a placeholder
            block_size: 1024,
        })
    }

    /// Sets the size of a block in bytes.
    pub fn set_block_size(&mut self, block_size: u32) {
        self.block_size = block_size;
    }

    /// Returns the size of the underlying storage in bytes.
    pub fn storage_size(&self) -> io::Result<u64> {
        storage_size(&self.path)
    }

    /// Reads `buf.len()` bytes at the byte offset `off`.
    pub fn read_at(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` at the byte offset `off`.
    pub fn write_at(&mut self, off: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Reads `buf.len()` bytes from the block `blk`, starting `off` bytes
    /// into the block.
    pub fn read_block_at(&mut self, blk: u32, off: u32, buf: &mut [u8]) -> Result<()> {
        self.read_at(blk as u64 * self.block_size as u64 + off as u64, buf)
    }

    /// Reads from the beginning of the block `blk` into `buf`.
    ///
    /// `buf` need not cover the whole block.
    pub fn read_block(&mut self, blk: u32, buf: &mut [u8]) -> Result<()> {
        self.read_block_at(blk, 0, buf)
    }

    /// Writes `buf` into the block `blk`, starting `off` bytes into the
    /// block.
    pub fn write_block_at(&mut self, blk: u32, off: u32, buf: &[u8]) -> Result<()> {
        self.write_at(blk as u64 * self.block_size as u64 + off as u64, buf)
    }

    /// Writes `buf` at the beginning of the block `blk`.
    pub fn write_block(&mut self, blk: u32, buf: &[u8]) -> Result<()> {
        self.write_block_at(blk, 0, buf)
    }

    /// Reads a string from the block `blk`, starting `off` bytes into the
    /// block.
    ///
    /// The string ends at the first NUL byte or after `max` bytes, whichever
    /// comes first.
    pub fn read_string(&mut self, blk: u32, max: usize, off: u32) -> Result<String> {
        let mut buf = vec![0u8; max];
        self.read_block_at(blk, off, &mut buf)?;
        let len = buf.iter().position(|b| *b == 0).unwrap_or(max);
        buf.truncate(len);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Reads an object of the given type at the byte offset `off`.
    ///
    /// # Safety
    ///
    /// If the bytes on disk are not a valid representation of `T`, the
    /// behaviour is undefined.
    pub unsafe fn read_struct<T>(&mut self, off: u64) -> Result<T> {
        let mut obj = MaybeUninit::<T>::uninit();
        let slice =
            unsafe { slice::from_raw_parts_mut(obj.as_mut_ptr() as *mut u8, size_of::<T>()) };
        self.read_at(off, slice)?;
        Ok(unsafe { obj.assume_init() })
    }

    /// Writes the object `obj` at the byte offset `off`.
    pub fn write_struct<T>(&mut self, obj: &T, off: u64) -> Result<()> {
        let slice =
            unsafe { slice::from_raw_parts(obj as *const T as *const u8, size_of_val(obj)) };
        self.write_at(off, slice)
    }
}
