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

//! Block and inode usage bitmaps.
//!
//! Each block group owns one bitmap for its blocks and one for its inodes,
//! one bit per item, bit `j` of byte `i` standing for item `i * 8 + j`. A set
//! bit means the item is in use.
//!
//! Bitmaps are read from the device at the beginning of each operation and
//! written back together with the free counters they govern: first the bitmap
//! block itself, then the group descriptor, then the superblock, so the three
//! views never drift apart past the end of an operation.

use crate::bgd::GroupDescriptor;
use crate::error::{Error, Result};
use crate::Fs;
use log::debug;

/// A single group's usage bitmap.
#[derive(Clone, Debug)]
pub struct Bitmap(Vec<u8>);

impl Bitmap {
    /// Wraps raw bitmap bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the bitmap.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the number of items covered by the bitmap.
    pub fn len(&self) -> u32 {
        self.0.len() as u32 * 8
    }

    /// Tells whether the item `i` is in use.
    pub fn is_set(&self, i: u32) -> bool {
        self.0[i as usize / 8] & (1 << (i % 8)) != 0
    }

    /// Marks the item `i` as used.
    pub fn set(&mut self, i: u32) {
        self.0[i as usize / 8] |= 1 << (i % 8);
    }

    /// Marks the item `i` as free.
    pub fn clear(&mut self, i: u32) {
        self.0[i as usize / 8] &= !(1 << (i % 8));
    }

    /// Returns the number of free items.
    pub fn free_count(&self) -> u32 {
        self.0.iter().map(|b| b.count_zeros()).sum()
    }

    /// Returns the index of the first run of `size` consecutive free items,
    /// if any.
    pub fn first_free_run(&self, size: u32) -> Option<u32> {
        let mut count = 0;
        for (i, byte) in self.0.iter().enumerate() {
            for j in 0..8 {
                if byte & (1 << j) != 0 {
                    count = 0;
                } else {
                    count += 1;
                    if count == size {
                        return Some((i * 8 + j) as u32 - (size - 1));
                    }
                }
            }
        }
        None
    }

    /// Returns the indices of up to `max` free items, lowest first.
    pub fn free_items(&self, max: u32) -> Vec<u32> {
        let mut items = Vec::new();
        for (i, byte) in self.0.iter().enumerate() {
            for j in 0..8 {
                if items.len() as u32 == max {
                    return items;
                }
                if byte & (1 << j) == 0 {
                    items.push((i * 8 + j) as u32);
                }
            }
        }
        items
    }
}

impl Fs {
    /// Returns the size in bytes of the block bitmap of the group `group`.
    ///
    /// In the last group, the bitmap is truncated when the total block count
    /// is not a multiple of the group size.
    fn block_bitmap_len(&self, group: u32) -> usize {
        let sp = &self.sp;
        if group == sp.get_groups_count() - 1 && sp.total_blocks % sp.blocks_per_group != 0 {
            (sp.total_blocks % sp.blocks_per_group) as usize / 8
        } else {
            sp.blocks_per_group as usize / 8
        }
    }

    /// Returns the size in bytes of the inode bitmap of the group `group`.
    fn inode_bitmap_len(&self, group: u32) -> usize {
        let sp = &self.sp;
        if group == sp.get_groups_count() - 1 && sp.total_inodes % sp.inodes_per_group != 0 {
            (sp.total_inodes % sp.inodes_per_group) as usize / 8
        } else {
            sp.inodes_per_group as usize / 8
        }
    }

    /// Reads the block usage bitmap of the group `group`.
    pub fn read_block_bitmap(&mut self, group: u32) -> Result<Bitmap> {
        let bgd = GroupDescriptor::read(group, &self.sp, &mut self.dev)?;
        let mut buf = vec![0u8; self.block_bitmap_len(group)];
        self.dev.read_block(bgd.block_usage_bitmap_addr, &mut buf)?;
        Ok(Bitmap::new(buf))
    }

    /// Reads the inode usage bitmap of the group `group`.
    pub fn read_inode_bitmap(&mut self, group: u32) -> Result<Bitmap> {
        let bgd = GroupDescriptor::read(group, &self.sp, &mut self.dev)?;
        let mut buf = vec![0u8; self.inode_bitmap_len(group)];
        self.dev.read_block(bgd.inode_usage_bitmap_addr, &mut buf)?;
        Ok(Bitmap::new(buf))
    }

    /// Computes the number of items freed minus the number of items
    /// allocated between `cur` and `new`.
    fn bitmap_delta(cur: &Bitmap, new: &Bitmap) -> i32 {
        let mut delta = 0;
        for i in 0..cur.len().min(new.len()) {
            match (cur.is_set(i), new.is_set(i)) {
                (false, true) => delta -= 1,
                (true, false) => delta += 1,
                _ => {}
            }
        }
        delta
    }

    /// Writes the block usage bitmap of the group `group` and updates the
    /// free-block counters of the group descriptor and the superblock to
    /// match it.
    pub fn write_block_bitmap(&mut self, group: u32, bitmap: &Bitmap) -> Result<()> {
        let cur = self.read_block_bitmap(group)?;
        let delta = Self::bitmap_delta(&cur, bitmap);

        let mut bgd = GroupDescriptor::read(group, &self.sp, &mut self.dev)?;
        self.dev
            .write_block(bgd.block_usage_bitmap_addr, bitmap.as_bytes())?;
        bgd.unallocated_blocks_number = (bgd.unallocated_blocks_number as i32 + delta) as u16;
        bgd.write(group, &self.sp, &mut self.dev)?;
        self.sp.total_unallocated_blocks =
            (self.sp.total_unallocated_blocks as i64 + delta as i64) as u32;
        self.sp.write(&mut self.dev)
    }

    /// Writes the inode usage bitmap of the group `group` and updates the
    /// free-inode counters of the group descriptor and the superblock to
    /// match it.
    pub fn write_inode_bitmap(&mut self, group: u32, bitmap: &Bitmap) -> Result<()> {
        let cur = self.read_inode_bitmap(group)?;
        let delta = Self::bitmap_delta(&cur, bitmap);

        let mut bgd = GroupDescriptor::read(group, &self.sp, &mut self.dev)?;
        self.dev
            .write_block(bgd.inode_usage_bitmap_addr, bitmap.as_bytes())?;
        bgd.unallocated_inodes_number = (bgd.unallocated_inodes_number as i32 + delta) as u16;
        bgd.write(group, &self.sp, &mut self.dev)?;
        self.sp.total_unallocated_inodes =
            (self.sp.total_unallocated_inodes as i64 + delta as i64) as u32;
        self.sp.write(&mut self.dev)
    }

    /// Adds `delta` to the directories counter of the group `group`.
    pub(crate) fn update_directories_count(&mut self, group: u32, delta: i32) -> Result<()> {
        let mut bgd = GroupDescriptor::read(group, &self.sp, &mut self.dev)?;
        bgd.directories_number = (bgd.directories_number as i32 + delta) as u16;
        bgd.write(group, &self.sp, &mut self.dev)
    }

    /// Writes `buf` to consecutive free blocks of a single group and returns
    /// the absolute number of the first block.
    ///
    /// Groups are tried in order starting at `hint_group`, wrapping around.
    /// If no group has a large enough run of consecutive free blocks, the
    /// function returns [`Error::NoContiguousSpace`].
    pub fn write_contiguous(&mut self, buf: &[u8], hint_group: u32) -> Result<u32> {
        let blk_size = self.sp.get_block_size() as usize;
        let groups_count = self.sp.get_groups_count();
        let count = buf.len().div_ceil(blk_size) as u32;

        for k in 0..groups_count {
            let group = (hint_group + k) % groups_count;
            let bgd = GroupDescriptor::read(group, &self.sp, &mut self.dev)?;
            if (bgd.unallocated_blocks_number as u32) < count {
                continue;
            }
            let mut bitmap = self.read_block_bitmap(group)?;
            let Some(first) = bitmap.first_free_run(count) else {
                continue;
            };
            for i in first..first + count {
                bitmap.set(i);
            }
            let blk = group * self.sp.blocks_per_group + first;
            // Data first, then the accounting
            for i in 0..count as usize {
                let chunk = &buf[i * blk_size..buf.len().min((i + 1) * blk_size)];
                self.dev.write_block(blk + i as u32, chunk)?;
            }
            self.write_block_bitmap(group, &bitmap)?;
            debug!("allocated {count} contiguous block(s) at {blk} in group {group}");
            return Ok(blk);
        }
        Err(Error::NoContiguousSpace)
    }

    /// Writes `buf` to free blocks picked anywhere on the filesystem and
    /// returns their absolute numbers, in the order the chunks of `buf` were
    /// written to them.
    ///
    /// Groups are tried in order starting at `hint_group`, wrapping around,
    /// taking in each group as many free blocks as it can give. If the
    /// filesystem has fewer free blocks than needed, the function returns
    /// [`Error::NoSpace`] without writing anything.
    pub fn write_non_contiguous(&mut self, buf: &[u8], hint_group: u32) -> Result<Vec<u32>> {
        let blk_size = self.sp.get_block_size() as usize;
        let groups_count = self.sp.get_groups_count();
        let count = buf.len().div_ceil(blk_size) as u32;
        if self.sp.total_unallocated_blocks < count {
            return Err(Error::NoSpace);
        }

        let mut blocks = Vec::with_capacity(count as usize);
        let mut group = hint_group % groups_count;
        let mut stalled = 0;
        while (blocks.len() as u32) < count {
            let mut bitmap = self.read_block_bitmap(group)?;
            let local = bitmap.free_items(count - blocks.len() as u32);
            // Guard against counters lying about the actual bitmap state
            if local.is_empty() {
                stalled += 1;
                if stalled >= groups_count {
                    return Err(Error::NoSpace);
                }
                group = (group + 1) % groups_count;
                continue;
            }
            stalled = 0;
            for bit in local {
                bitmap.set(bit);
                let blk = group * self.sp.blocks_per_group + bit;
                let i = blocks.len();
                let chunk = &buf[i * blk_size..buf.len().min((i + 1) * blk_size)];
                self.dev.write_block(blk, chunk)?;
                blocks.push(blk);
            }
            self.write_block_bitmap(group, &bitmap)?;
            group = (group + 1) % groups_count;
        }
        debug!("allocated {count} scattered block(s) starting in group {hint_group}");
        Ok(blocks)
    }

    /// Marks the block `blk` as free.
    ///
    /// The block's contents are left in place.
    pub fn clear_block(&mut self, blk: u32) -> Result<()> {
        let group = blk / self.sp.blocks_per_group;
        let index = blk % self.sp.blocks_per_group;
        let mut bitmap = self.read_block_bitmap(group)?;
        bitmap.clear(index);
        self.write_block_bitmap(group, &bitmap)
    }
}
