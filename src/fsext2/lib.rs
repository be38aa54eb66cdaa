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

//! User-space engine for the ext2 filesystem, working on a disk image
//! presented as a single seekable file.
//!
//! The filesystem divides the storage device into several substructures:
//! - Block Group: described by the Block Group Descriptor Table (BGDT)
//! - Block: stored inside of block groups
//! - INode: represents a file in the filesystem
//! - Directory entry: an entry stored into a directory inode's content
//!
//! The access to an INode's data is divided into several parts, each
//! overflowing on the next when full:
//! - Direct Block Pointers: each inode has 12 of them
//! - Singly Indirect Block Pointer: a pointer to a block dedicated to storing
//!   a list of more blocks to store the inode's data. The number of blocks it
//!   can store depends on the size of a block.
//! - Doubly Indirect Block Pointer: a pointer to a block storing pointers to
//!   Singly Indirect Block Pointers, each storing pointers to more blocks.
//! - Triply Indirect Block Pointer: a pointer to a block storing pointers to
//!   Doubly Indirect Block Pointers, each storing pointers to Singly Indirect
//!   Block Pointers, each storing pointers to more blocks.
//!
//! For more information, see the [specifications](https://www.nongnu.org/ext2-doc/ext2.html).

pub mod bgd;
pub mod bitmap;
pub mod device;
pub mod dirent;
mod dump;
pub mod entry;
pub mod error;
pub mod inode;
pub mod navigator;
pub mod superblock;
#[cfg(test)]
pub(crate) mod testutil;

pub use entry::{Entry, EntryData};
pub use error::{Error, Result};
pub use inode::FileType;
pub use navigator::Navigator;

use bgd::GroupDescriptor;
use device::Device;
use dirent::Directory;
use inode::ROOT_DIRECTORY_INODE;
use log::warn;
use std::io;
use std::mem::size_of;
use std::path::Path;
use superblock::Superblock;

/// An open ext2 filesystem.
///
/// The instance is the exclusive owner of the image handle; every operation
/// goes through it.
pub struct Fs {
    /// The device holding the filesystem.
    pub(crate) dev: Device,
    /// The filesystem's superblock.
    pub(crate) sp: Superblock,
    /// The number of blocks reserved for growing the descriptor table,
    /// derived from group 0's layout.
    pub(crate) reserved_gdt_blocks: u32,
    /// The number of blocks used by the filesystem's own metadata.
    pub(crate) overhead_blocks: u32,
}

impl Fs {
    /// Opens the filesystem on the image or block device at `path`.
    ///
    /// Fails with [`Error::BadMagic`] if the superblock carries the wrong
    /// signature, and with [`Error::MissingFeature`] if directory entries do
    /// not carry file types, which the engine relies on.
    pub fn open(path: &Path) -> Result<Self> {
        let mut dev = Device::open(path)?;
        let sp = Superblock::read(&mut dev)?;
        if !sp.is_valid() {
            return Err(Error::BadMagic);
        }
        if !sp.has_filetype_feature() {
            return Err(Error::MissingFeature("filetype"));
        }
        dev.set_block_size(sp.get_block_size());

        let expected = sp.total_blocks as u64 * sp.get_block_size() as u64;
        match dev.storage_size() {
            Ok(actual) if actual < expected => {
                return Err(Error::Image(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("image is {actual} bytes, filesystem needs {expected}"),
                )));
            }
            Ok(_) => {}
            Err(e) => warn!("cannot read the storage size: {e}"),
        }

        // Figures derived from the first group's layout, only used for
        // reporting
        let bgd0 = GroupDescriptor::read(0, &sp, &mut dev)?;
        let gdt_offset = sp.get_bgdt_offset() as u64;
        let gdt_end_blk = (gdt_offset * sp.get_block_size() as u64
            + sp.get_groups_count() as u64 * size_of::<GroupDescriptor>() as u64)
            / sp.get_block_size() as u64;
        let reserved_gdt_blocks = (bgd0.block_usage_bitmap_addr as i64
            - gdt_end_blk as i64
            - gdt_offset as i64
            + 1)
        .max(0) as u32;
        let overhead_blocks = ((bgd0.inode_table_start_addr as u64
            + sp.get_inode_blocks_per_group() as u64
            - gdt_offset
            + 1)
            * sp.get_groups_count() as u64
            + gdt_offset
            - 1) as u32;

        Ok(Self {
            dev,
            sp,
            reserved_gdt_blocks,
            overhead_blocks,
        })
    }

    /// Returns the filesystem's superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.sp
    }

    /// Returns the root directory.
    pub fn root(&mut self) -> Result<Directory> {
        Directory::load(self, ROOT_DIRECTORY_INODE)
    }

    /// Returns a navigator standing at the root directory.
    pub fn navigator(&mut self) -> Result<Navigator> {
        Ok(Navigator::new(self.root()?))
    }

    /// Resolves the absolute path `path` to an entry.
    pub fn entry(&mut self, path: &str) -> Result<Entry> {
        if !path.starts_with('/') {
            return Err(Error::NotFound);
        }
        let nav = self.navigator()?;
        nav.entry(self, path)
    }

    /// Returns the underlying device, for raw block access.
    pub fn dev_mut(&mut self) -> &mut Device {
        &mut self.dev
    }
}
