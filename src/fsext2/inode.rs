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

//! An inode represents a file in the filesystem.
//!
//! The name of the file is not included in the inode but in the directory
//! entry associated with it since several entries can refer to the same inode
//! (hard links).
//!
//! The inode's content is reached through its block pointers, each level
//! overflowing on the next when full:
//! - Direct Block Pointers: each inode has 12 of them
//! - Singly Indirect Block Pointer: points to a block filled with pointers to
//!   more content blocks
//! - Doubly Indirect Block Pointer: points to a block filled with pointers to
//!   Singly Indirect Block Pointers
//! - Triply Indirect Block Pointer: one level deeper still
//!
//! A pointer of value zero is a hole: it carries no block and is skipped when
//! walking the content.

use crate::bgd::GroupDescriptor;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::superblock::{Superblock, WRITE_REQUIRED_64_BITS};
use crate::Fs;
use log::debug;
use std::collections::VecDeque;
use std::mem::size_of;

/// The number of direct block pointers in an inode.
pub const DIRECT_BLOCKS_COUNT: usize = 12;

/// The inode of the root directory.
pub const ROOT_DIRECTORY_INODE: u32 = 2;

/// INode type: FIFO
pub const INODE_TYPE_FIFO: u16 = 0x1000;
/// INode type: Char device
pub const INODE_TYPE_CHAR_DEVICE: u16 = 0x2000;
/// INode type: Directory
pub const INODE_TYPE_DIRECTORY: u16 = 0x4000;
/// INode type: Block device
pub const INODE_TYPE_BLOCK_DEVICE: u16 = 0x6000;
/// INode type: Regular file
pub const INODE_TYPE_REGULAR: u16 = 0x8000;
/// INode type: Symbolic link
pub const INODE_TYPE_SYMLINK: u16 = 0xa000;
/// INode type: Socket
pub const INODE_TYPE_SOCKET: u16 = 0xc000;

/// The default permissions of a new directory.
pub const DEFAULT_DIRECTORY_MODE: u16 = 0o755;
/// The default permissions of a new regular file.
pub const DEFAULT_FILE_MODE: u16 = 0o644;

/// A file's type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    /// The type is not known.
    Unknown,
    /// A FIFO.
    Fifo,
    /// A character device.
    CharDevice,
    /// A directory.
    Directory,
    /// A block device.
    BlockDevice,
    /// A regular file.
    Regular,
    /// A symbolic link.
    Link,
    /// A Unix socket.
    Socket,
}

impl FileType {
    /// Returns the type stored in the given inode mode.
    pub fn from_mode(mode: u16) -> Self {
        match mode & 0xf000 {
            INODE_TYPE_FIFO => Self::Fifo,
            INODE_TYPE_CHAR_DEVICE => Self::CharDevice,
            INODE_TYPE_DIRECTORY => Self::Directory,
            INODE_TYPE_BLOCK_DEVICE => Self::BlockDevice,
            INODE_TYPE_REGULAR => Self::Regular,
            INODE_TYPE_SYMLINK => Self::Link,
            INODE_TYPE_SOCKET => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// Returns the type bits to store in an inode mode.
    pub fn to_mode(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Fifo => INODE_TYPE_FIFO,
            Self::CharDevice => INODE_TYPE_CHAR_DEVICE,
            Self::Directory => INODE_TYPE_DIRECTORY,
            Self::BlockDevice => INODE_TYPE_BLOCK_DEVICE,
            Self::Regular => INODE_TYPE_REGULAR,
            Self::Link => INODE_TYPE_SYMLINK,
            Self::Socket => INODE_TYPE_SOCKET,
        }
    }

    /// Returns the type for the given directory entry type indicator.
    ///
    /// Unrecognized indicators map to [`FileType::Unknown`].
    pub fn from_dirent_type(indicator: u8) -> Self {
        match indicator {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::CharDevice,
            4 => Self::BlockDevice,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::Link,
            _ => Self::Unknown,
        }
    }

    /// Returns the directory entry type indicator for the type.
    pub fn to_dirent_type(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Regular => 1,
            Self::Directory => 2,
            Self::CharDevice => 3,
            Self::BlockDevice => 4,
            Self::Fifo => 5,
            Self::Socket => 6,
            Self::Link => 7,
        }
    }
}

/// The ext2 inode structure.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Inode {
    /// Type and permissions.
    pub mode: u16,
    /// User ID.
    pub uid: u16,
    /// Lower 32 bits of size in bytes.
    pub size_low: u32,
    /// Timestamp of the last access.
    pub atime: u32,
    /// Timestamp of the creation of the metadata.
    pub ctime: u32,
    /// Timestamp of the last modification of the content.
    pub mtime: u32,
    /// Timestamp of the deletion.
    pub dtime: u32,
    /// Group ID.
    pub gid: u16,
    /// The number of hard links to this inode.
    pub hard_links_count: u16,
    /// The number of sectors used by this inode.
    pub used_sectors: u32,
    /// INode flags.
    pub flags: u32,
    /// OS-specific value.
    pub os_specific_0: u32,
    /// Direct block pointers.
    pub direct_block_ptrs: [u32; DIRECT_BLOCKS_COUNT],
    /// Singly indirect block pointer.
    pub singly_indirect_block_ptr: u32,
    /// Doubly indirect block pointer.
    pub doubly_indirect_block_ptr: u32,
    /// Triply indirect block pointer.
    pub triply_indirect_block_ptr: u32,
    /// Generation number.
    pub generation: u32,
    /// The file's ACL.
    pub extended_attributes_block: u32,
    /// Higher 32 bits of size in bytes.
    pub size_high: u32,
    /// Block address of fragment.
    pub fragment_addr: u32,
    /// OS-specific value.
    pub os_specific_1: [u8; 12],
}

impl Inode {
    /// Creates a fresh inode record of the given type, with no content.
    ///
    /// Arguments:
    /// - `file_type` is the type of the file.
    /// - `permissions` are the lower 12 mode bits.
    /// - `timestamp` is used for the access, creation and modification times.
    pub fn new(file_type: FileType, permissions: u16, timestamp: u32) -> Self {
        Self {
            mode: file_type.to_mode() | (permissions & 0x0fff),
            uid: 0,
            size_low: 0,
            atime: timestamp,
            ctime: timestamp,
            mtime: timestamp,
            dtime: 0,
            gid: 0,
            hard_links_count: 1,
            used_sectors: 0,
            flags: 0,
            os_specific_0: 0,
            direct_block_ptrs: [0; DIRECT_BLOCKS_COUNT],
            singly_indirect_block_ptr: 0,
            doubly_indirect_block_ptr: 0,
            triply_indirect_block_ptr: 0,
            generation: 0,
            extended_attributes_block: 0,
            size_high: 0,
            fragment_addr: 0,
            os_specific_1: [0; 12],
        }
    }

    /// Returns the offset of the inode on the disk in bytes.
    ///
    /// `i` is the inode's number, starting at `1`.
    fn disk_offset(i: u32, sp: &Superblock, dev: &mut Device) -> Result<u64> {
        if i == 0 {
            return Err(Error::NotFound);
        }
        let blk_size = sp.get_block_size() as u64;
        let inode_size = sp.get_inode_size() as u64;

        // The block group the inode is located in
        let group = (i - 1) / sp.inodes_per_group;
        // The offset of the inode in the group's inode table
        let index = ((i - 1) % sp.inodes_per_group) as u64;
        // The offset of the inode's block in the table
        let table_blk_off = index * inode_size / blk_size;
        // The offset of the inode inside its block
        let blk_inner_off = index % (blk_size / inode_size) * inode_size;

        let bgd = GroupDescriptor::read(group, sp, dev)?;
        let blk = bgd.inode_table_start_addr as u64 + table_blk_off;
        Ok(blk * blk_size + blk_inner_off)
    }

    /// Reads the `i`th inode from the given device. The number `i` starts at
    /// `1`.
    pub fn read(i: u32, sp: &Superblock, dev: &mut Device) -> Result<Self> {
        let off = Self::disk_offset(i, sp, dev)?;
        unsafe { dev.read_struct::<Self>(off) }
    }

    /// Writes the inode as the `i`th record of the inode table.
    pub fn write(&self, i: u32, sp: &Superblock, dev: &mut Device) -> Result<()> {
        let off = Self::disk_offset(i, sp, dev)?;
        dev.write_struct(self, off)
    }

    /// Returns the type of the file.
    pub fn get_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    /// Returns the permissions of the file.
    pub fn get_permissions(&self) -> u16 {
        self.mode & 0x0fff
    }

    /// Returns the size of the file in bytes.
    pub fn get_size(&self, sp: &Superblock) -> u64 {
        let has_64bits =
            sp.major_version >= 1 && sp.write_required_features & WRITE_REQUIRED_64_BITS != 0;
        if has_64bits {
            (self.size_high as u64) << 32 | self.size_low as u64
        } else {
            self.size_low as u64
        }
    }

    /// Sets the size of the file in bytes.
    pub fn set_size(&mut self, sp: &Superblock, size: u64) {
        let has_64bits =
            sp.major_version >= 1 && sp.write_required_features & WRITE_REQUIRED_64_BITS != 0;
        if has_64bits {
            self.size_high = (size >> 32) as u32;
        }
        self.size_low = size as u32;
    }
}

impl Fs {
    /// Reads the inode with the number `n`.
    pub fn read_inode(&mut self, n: u32) -> Result<Inode> {
        Inode::read(n, &self.sp, &mut self.dev)
    }

    /// Writes `inode` as the inode with the number `n`.
    pub fn write_inode(&mut self, n: u32, inode: &Inode) -> Result<()> {
        inode.write(n, &self.sp, &mut self.dev)
    }

    /// Allocates a free inode, writes `inode` into it and returns its
    /// number.
    ///
    /// Groups are tried in order starting at `hint_group`, wrapping around.
    /// If the inode is a directory, the group's directories counter is
    /// incremented.
    pub fn alloc_inode(&mut self, inode: &Inode, hint_group: u32) -> Result<u32> {
        let groups_count = self.sp.get_groups_count();
        for k in 0..groups_count {
            let group = (hint_group + k) % groups_count;
            let bgd = GroupDescriptor::read(group, &self.sp, &mut self.dev)?;
            if bgd.unallocated_inodes_number == 0 {
                continue;
            }
            let mut bitmap = self.read_inode_bitmap(group)?;
            let Some(index) = bitmap.first_free_run(1) else {
                continue;
            };
            bitmap.set(index);
            let n = group * self.sp.inodes_per_group + index + 1;
            self.write_inode(n, inode)?;
            self.write_inode_bitmap(group, &bitmap)?;
            if inode.get_type() == FileType::Directory {
                self.update_directories_count(group, 1)?;
            }
            debug!("allocated inode {n} in group {group}");
            return Ok(n);
        }
        Err(Error::NoSpace)
    }

    /// Frees the inode with the number `n` along with all its content
    /// blocks, including the indirect pointer blocks.
    ///
    /// The blocks and the inode record keep their contents; only the bitmap
    /// bits and counters change. If the inode is a directory, its entries
    /// are *not* freed recursively.
    pub fn free_inode(&mut self, n: u32) -> Result<()> {
        let inode = self.read_inode(n)?;
        for blk in self.collect_blocks(&inode, true)? {
            self.clear_block(blk)?;
        }
        let group = (n - 1) / self.sp.inodes_per_group;
        let index = (n - 1) % self.sp.inodes_per_group;
        let mut bitmap = self.read_inode_bitmap(group)?;
        bitmap.clear(index);
        self.write_inode_bitmap(group, &bitmap)?;
        if inode.get_type() == FileType::Directory {
            self.update_directories_count(group, -1)?;
        }
        debug!("freed inode {n}");
        Ok(())
    }

    /// Reads the block `blk` as an array of block pointers.
    pub(crate) fn read_pointer_block(&mut self, blk: u32) -> Result<Vec<u32>> {
        let mut buf = vec![0u8; self.sp.get_block_size() as usize];
        self.dev.read_block(blk, &mut buf)?;
        Ok(buf
            .chunks_exact(size_of::<u32>())
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Writes `ptrs` to the block `blk` as an array of block pointers.
    pub(crate) fn write_pointer_block(&mut self, blk: u32, ptrs: &[u32]) -> Result<()> {
        let mut buf = Vec::with_capacity(ptrs.len() * size_of::<u32>());
        for p in ptrs {
            buf.extend_from_slice(&p.to_le_bytes());
        }
        self.dev.write_block(blk, &buf)
    }

    /// Collects the blocks reachable from the pointer block `blk`, which
    /// points `depth` levels deep, into `out`.
    fn collect_indirect(
        &mut self,
        blk: u32,
        depth: u8,
        include_tables: bool,
        out: &mut Vec<u32>,
    ) -> Result<()> {
        if include_tables {
            out.push(blk);
        }
        for ptr in self.read_pointer_block(blk)? {
            if ptr == 0 {
                continue;
            }
            if depth > 1 {
                self.collect_indirect(ptr, depth - 1, include_tables, out)?;
            } else {
                out.push(ptr);
            }
        }
        Ok(())
    }

    /// Collects every block used by `inode`, in content order.
    ///
    /// When `include_tables` is set, the indirect pointer blocks themselves
    /// are included, each before the blocks it points to. Zero pointers are
    /// holes and are skipped.
    pub fn collect_blocks(&mut self, inode: &Inode, include_tables: bool) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        for ptr in inode.direct_block_ptrs {
            if ptr != 0 {
                out.push(ptr);
            }
        }
        let levels = [
            (inode.singly_indirect_block_ptr, 1),
            (inode.doubly_indirect_block_ptr, 2),
            (inode.triply_indirect_block_ptr, 3),
        ];
        for (ptr, depth) in levels {
            if ptr != 0 {
                self.collect_indirect(ptr, depth, include_tables, &mut out)?;
            }
        }
        Ok(out)
    }

    /// Reads the whole content of `inode`.
    pub fn read_inode_data(&mut self, inode: &Inode) -> Result<Vec<u8>> {
        let size = inode.get_size(&self.sp) as usize;
        let blk_size = self.sp.get_block_size() as usize;
        let mut data = Vec::with_capacity(size.next_multiple_of(blk_size.max(1)));
        let mut buf = vec![0u8; blk_size];
        for blk in self.collect_blocks(inode, false)? {
            self.dev.read_block(blk, &mut buf)?;
            data.extend_from_slice(&buf);
            if data.len() >= size {
                break;
            }
        }
        data.truncate(size);
        Ok(data)
    }

    /// Allocates a block holding the given pointer table, trying contiguous
    /// allocation first and falling back on non-contiguous.
    fn alloc_pointer_block(&mut self, ptrs: &[u32], hint_group: u32) -> Result<u32> {
        let mut buf = Vec::with_capacity(ptrs.len() * size_of::<u32>());
        for p in ptrs {
            buf.extend_from_slice(&p.to_le_bytes());
        }
        match self.write_contiguous(&buf, hint_group) {
            Err(Error::NoContiguousSpace) => {
                let blocks = self.write_non_contiguous(&buf, hint_group)?;
                Ok(blocks[0])
            }
            res => res,
        }
    }

    /// Builds a new pointer table `depth` levels deep, consuming as many
    /// block numbers from `pending` as it can reach, and returns the block
    /// holding the table.
    fn build_table(
        &mut self,
        depth: u8,
        pending: &mut VecDeque<u32>,
        hint_group: u32,
    ) -> Result<u32> {
        let entries_per_blk = self.sp.get_block_size() as usize / size_of::<u32>();
        let mut ptrs = vec![0u32; entries_per_blk];
        for slot in ptrs.iter_mut() {
            if pending.is_empty() {
                break;
            }
            *slot = if depth > 1 {
                self.build_table(depth - 1, pending, hint_group)?
            } else {
                pending.pop_front().unwrap()
            };
        }
        self.alloc_pointer_block(&ptrs, hint_group)
    }

    /// Fills the free slots of the existing pointer table at `table_blk`,
    /// which points `depth` levels deep, with block numbers from `pending`.
    fn top_up_table(
        &mut self,
        table_blk: u32,
        depth: u8,
        pending: &mut VecDeque<u32>,
        hint_group: u32,
    ) -> Result<()> {
        let mut ptrs = self.read_pointer_block(table_blk)?;
        let mut dirty = false;
        for slot in ptrs.iter_mut() {
            if pending.is_empty() {
                break;
            }
            if *slot == 0 {
                *slot = if depth > 1 {
                    self.build_table(depth - 1, pending, hint_group)?
                } else {
                    pending.pop_front().unwrap()
                };
                dirty = true;
            } else if depth > 1 {
                self.top_up_table(*slot, depth - 1, pending, hint_group)?;
            }
        }
        if dirty {
            self.write_pointer_block(table_blk, &ptrs)?;
        }
        Ok(())
    }

    /// Hands `pending` block numbers to one indirect level of an inode.
    ///
    /// `ptr` is the level's current root table block, zero when the level is
    /// not in use yet. Returns the level's root table block, which may have
    /// just been allocated.
    fn attach_level(
        &mut self,
        ptr: u32,
        depth: u8,
        pending: &mut VecDeque<u32>,
        hint_group: u32,
    ) -> Result<u32> {
        if pending.is_empty() {
            return Ok(ptr);
        }
        if ptr == 0 {
            self.build_table(depth, pending, hint_group)
        } else {
            self.top_up_table(ptr, depth, pending, hint_group)?;
            Ok(ptr)
        }
    }

    /// Attaches the given data blocks to the inode `n`, filling the direct
    /// pointers first and then each indirect level, left to right.
    ///
    /// Returns [`Error::InodeFull`] if the triply indirect level cannot take
    /// the remaining blocks.
    pub fn attach_blocks(&mut self, n: u32, blocks: &[u32]) -> Result<()> {
        let mut inode = self.read_inode(n)?;
        let hint_group = (n - 1) / self.sp.inodes_per_group;
        let mut pending: VecDeque<u32> = blocks.iter().copied().collect();

        for slot in inode.direct_block_ptrs.iter_mut() {
            if pending.is_empty() {
                break;
            }
            if *slot == 0 {
                *slot = pending.pop_front().unwrap();
            }
        }
        inode.singly_indirect_block_ptr =
            self.attach_level(inode.singly_indirect_block_ptr, 1, &mut pending, hint_group)?;
        inode.doubly_indirect_block_ptr =
            self.attach_level(inode.doubly_indirect_block_ptr, 2, &mut pending, hint_group)?;
        inode.triply_indirect_block_ptr =
            self.attach_level(inode.triply_indirect_block_ptr, 3, &mut pending, hint_group)?;
        if !pending.is_empty() {
            return Err(Error::InodeFull);
        }
        debug!("attached {} block(s) to inode {n}", blocks.len());
        self.write_inode(n, &inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn on_disk_size() {
        assert_eq!(size_of::<Inode>(), 128);
    }

    #[test]
    fn type_mappings() {
        assert_eq!(FileType::from_mode(0x41ed), FileType::Directory);
        assert_eq!(FileType::from_mode(0x81a4), FileType::Regular);
        assert_eq!(FileType::from_mode(0), FileType::Unknown);
        for t in [
            FileType::Fifo,
            FileType::CharDevice,
            FileType::Directory,
            FileType::BlockDevice,
            FileType::Regular,
            FileType::Link,
            FileType::Socket,
        ] {
            assert_eq!(FileType::from_dirent_type(t.to_dirent_type()), t);
            assert_eq!(FileType::from_mode(t.to_mode() | 0o644), t);
        }
        // An unknown type indicator parses without error
        assert_eq!(FileType::from_dirent_type(0), FileType::Unknown);
        assert_eq!(FileType::from_dirent_type(42), FileType::Unknown);
    }

    #[test]
    fn read_write_round_trip() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let root = fs.read_inode(ROOT_DIRECTORY_INODE).unwrap();
        assert_eq!(root.get_type(), FileType::Directory);
        fs.write_inode(ROOT_DIRECTORY_INODE, &root).unwrap();
        assert_eq!(fs.read_inode(ROOT_DIRECTORY_INODE).unwrap(), root);
    }

    #[test]
    fn alloc_inode_updates_counters() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let free = fs.superblock().total_unallocated_inodes;

        let inode = Inode::new(FileType::Regular, DEFAULT_FILE_MODE, 0);
        let n = fs.alloc_inode(&inode, 0).unwrap();
        // Inodes 1 to 10 are reserved; the first free one follows
        assert!(n > ROOT_DIRECTORY_INODE);
        assert_eq!(fs.superblock().total_unallocated_inodes, free - 1);
        testutil::assert_inode_accounting(&mut fs);

        let back = fs.read_inode(n).unwrap();
        assert_eq!(back.get_type(), FileType::Regular);
        assert_eq!(back.get_permissions(), DEFAULT_FILE_MODE);
    }

    #[test]
    fn directory_alloc_bumps_directories_count() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let dirs_before = testutil::directories_count(&mut fs);

        let inode = Inode::new(FileType::Directory, DEFAULT_DIRECTORY_MODE, 0);
        let n = fs.alloc_inode(&inode, 0).unwrap();
        assert_eq!(testutil::directories_count(&mut fs), dirs_before + 1);

        fs.free_inode(n).unwrap();
        assert_eq!(testutil::directories_count(&mut fs), dirs_before);
        testutil::assert_inode_accounting(&mut fs);
    }

    #[test]
    fn attach_fills_direct_then_indirect() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let inode = Inode::new(FileType::Regular, DEFAULT_FILE_MODE, 0);
        let n = fs.alloc_inode(&inode, 0).unwrap();

        // 20 data blocks: 12 direct + 8 through the singly indirect table
        let data = vec![0x5au8; 20 * 1024];
        let blocks = fs.write_non_contiguous(&data, 0).unwrap();
        fs.attach_blocks(n, &blocks).unwrap();

        let inode = fs.read_inode(n).unwrap();
        assert!(inode.direct_block_ptrs.iter().all(|p| *p != 0));
        assert_ne!(inode.singly_indirect_block_ptr, 0);
        assert_eq!(inode.doubly_indirect_block_ptr, 0);

        let collected = fs.collect_blocks(&inode, false).unwrap();
        assert_eq!(collected, blocks);

        // The indirect table itself shows up when tables are included
        let with_tables = fs.collect_blocks(&inode, true).unwrap();
        assert_eq!(with_tables.len(), blocks.len() + 1);
        assert_eq!(with_tables[12], inode.singly_indirect_block_ptr);
    }

    #[test]
    fn attach_reaches_doubly_indirect() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let inode = Inode::new(FileType::Regular, DEFAULT_FILE_MODE, 0);
        let n = fs.alloc_inode(&inode, 0).unwrap();

        // 12 direct + 256 singly + 10 doubly with 1024 byte blocks
        let count = 12 + 256 + 10;
        let data = vec![1u8; count * 1024];
        let blocks = fs.write_non_contiguous(&data, 0).unwrap();
        fs.attach_blocks(n, &blocks).unwrap();

        let inode = fs.read_inode(n).unwrap();
        assert_ne!(inode.doubly_indirect_block_ptr, 0);
        assert_eq!(inode.triply_indirect_block_ptr, 0);
        let collected = fs.collect_blocks(&inode, false).unwrap();
        assert_eq!(collected, blocks);
        testutil::assert_block_accounting(&mut fs);
    }

    #[test]
    fn attach_in_two_passes_tops_up_tables() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let inode = Inode::new(FileType::Regular, DEFAULT_FILE_MODE, 0);
        let n = fs.alloc_inode(&inode, 0).unwrap();

        let first = fs.write_non_contiguous(&vec![2u8; 15 * 1024], 0).unwrap();
        fs.attach_blocks(n, &first).unwrap();
        let second = fs.write_non_contiguous(&vec![3u8; 5 * 1024], 0).unwrap();
        fs.attach_blocks(n, &second).unwrap();

        let inode = fs.read_inode(n).unwrap();
        let collected = fs.collect_blocks(&inode, false).unwrap();
        let expected: Vec<u32> = first.iter().chain(&second).copied().collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn free_inode_releases_all_blocks() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let free_before = fs.superblock().total_unallocated_blocks;

        let inode = Inode::new(FileType::Regular, DEFAULT_FILE_MODE, 0);
        let n = fs.alloc_inode(&inode, 0).unwrap();
        let blocks = fs.write_non_contiguous(&vec![4u8; 20 * 1024], 0).unwrap();
        fs.attach_blocks(n, &blocks).unwrap();
        // 20 data blocks + 1 indirect table
        assert_eq!(fs.superblock().total_unallocated_blocks, free_before - 21);

        fs.free_inode(n).unwrap();
        assert_eq!(fs.superblock().total_unallocated_blocks, free_before);
        testutil::assert_block_accounting(&mut fs);
        testutil::assert_inode_accounting(&mut fs);
    }

    #[test]
    fn holes_are_skipped() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let inode = Inode::new(FileType::Regular, DEFAULT_FILE_MODE, 0);
        let n = fs.alloc_inode(&inode, 0).unwrap();
        let blk = fs.write_contiguous(&[7u8; 1024], 0).unwrap();

        let mut rec = fs.read_inode(n).unwrap();
        // A hole between two direct pointers
        rec.direct_block_ptrs[0] = blk;
        rec.direct_block_ptrs[5] = blk;
        fs.write_inode(n, &rec).unwrap();

        let collected = fs.collect_blocks(&rec, false).unwrap();
        assert_eq!(collected, vec![blk, blk]);
    }
}
