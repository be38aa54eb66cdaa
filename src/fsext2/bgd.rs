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

//! A Block Group Descriptor is a structure stored in the Block Group
//! Descriptor Table which represents a block group, which is a subdivision of
//! the filesystem.

use crate::device::Device;
use crate::error::Result;
use crate::superblock::Superblock;
use std::mem::size_of;

/// Structure representing a block group descriptor to be stored into the
/// Block Group Descriptor Table (BGDT).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupDescriptor {
    /// The block address of the block usage bitmap.
    pub block_usage_bitmap_addr: u32,
    /// The block address of the inode usage bitmap.
    pub inode_usage_bitmap_addr: u32,
    /// Starting block address of inode table.
    pub inode_table_start_addr: u32,
    /// Number of unallocated blocks in group.
    pub unallocated_blocks_number: u16,
    /// Number of unallocated inodes in group.
    pub unallocated_inodes_number: u16,
    /// Number of directories in group.
    pub directories_number: u16,

    /// Structure padding.
    pub _padding: [u8; 14],
}

impl GroupDescriptor {
    /// Returns the offset in bytes of the `i`th block group descriptor.
    fn disk_offset(i: u32, sp: &Superblock) -> u64 {
        sp.get_bgdt_offset() as u64 * sp.get_block_size() as u64
            + i as u64 * size_of::<Self>() as u64
    }

    /// Reads the `i`th block group descriptor from the given device.
    ///
    /// `sp` is the filesystem's superblock.
    pub fn read(i: u32, sp: &Superblock, dev: &mut Device) -> Result<Self> {
        unsafe { dev.read_struct::<Self>(Self::disk_offset(i, sp)) }
    }

    /// Writes the current block group descriptor as the `i`th entry of the
    /// table.
    ///
    /// `sp` is the filesystem's superblock.
    pub fn write(&self, i: u32, sp: &Superblock, dev: &mut Device) -> Result<()> {
        dev.write_struct(self, Self::disk_offset(i, sp))
    }
}
