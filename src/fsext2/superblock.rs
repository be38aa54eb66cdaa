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

//! The superblock is the structure describing the filesystem as a whole.
//!
//! The primary copy is located 1024 bytes from the beginning of the device
//! and is 1024 bytes large. Most of the values the engine works with (block
//! size, group count, inode size, ...) are derived from it.

use crate::device::Device;
use crate::error::Result;
use uuid::Uuid;

/// The offset of the superblock from the beginning of the device.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// The filesystem's signature.
pub const EXT2_SIGNATURE: u16 = 0xef53;

/// State telling that the filesystem is clean.
pub const FS_STATE_CLEAN: u16 = 1;
/// State telling that the filesystem has errors.
pub const FS_STATE_ERROR: u16 = 2;

/// Error handle action telling to ignore it.
pub const ERR_ACTION_IGNORE: u16 = 1;
/// Error handle action telling to mount as read-only.
pub const ERR_ACTION_READ_ONLY: u16 = 2;
/// Error handle action telling to trigger a kernel panic.
pub const ERR_ACTION_KERNEL_PANIC: u16 = 3;

/// Optional feature: Journal
pub const OPTIONAL_FEATURE_JOURNAL: u32 = 0x4;
/// Optional feature: Inodes have extended attributes
pub const OPTIONAL_FEATURE_INODE_EXTENDED: u32 = 0x8;
/// Optional feature: Filesystem can resize itself for larger partitions
pub const OPTIONAL_FEATURE_RESIZE: u32 = 0x10;
/// Optional feature: Directories use hash index
pub const OPTIONAL_FEATURE_HASH_INDEX: u32 = 0x20;

/// Required feature: Compression
pub const REQUIRED_FEATURE_COMPRESSION: u32 = 0x1;
/// Required feature: Directory entries have a type field
pub const REQUIRED_FEATURE_DIRECTORY_TYPE: u32 = 0x2;

/// Write-required feature: Sparse superblocks and group descriptor tables
pub const WRITE_REQUIRED_SPARSE_SUPERBLOCKS: u32 = 0x1;
/// Write-required feature: Filesystem uses a 64-bit file size
pub const WRITE_REQUIRED_64_BITS: u32 = 0x2;
/// Write-required feature: Directory contents are stored in the form of a Binary Tree.
pub const WRITE_REQUIRED_DIRECTORY_BINARY_TREE: u32 = 0x4;

/// The ext2 superblock structure.
#[repr(C)]
#[derive(Clone, Debug, PartialEq)]
pub struct Superblock {
    /// Total number of inodes in the filesystem.
    pub total_inodes: u32,
    /// Total number of blocks in the filesystem.
    pub total_blocks: u32,
    /// Number of blocks reserved for the superuser.
    pub superuser_blocks: u32,
    /// Total number of unallocated blocks.
    pub total_unallocated_blocks: u32,
    /// Total number of unallocated inodes.
    pub total_unallocated_inodes: u32,
    /// Block number of the block containing the superblock.
    pub superblock_block_number: u32,
    /// `log2(block_size) - 10`
    pub block_size_log: u32,
    /// `log2(fragment_size) - 10`
    pub fragment_size_log: u32,
    /// The number of blocks per block group.
    pub blocks_per_group: u32,
    /// The number of fragments per block group.
    pub fragments_per_group: u32,
    /// The number of inodes per block group.
    pub inodes_per_group: u32,
    /// The timestamp of the last mount operation.
    pub last_mount_timestamp: u32,
    /// The timestamp of the last write operation.
    pub last_write_timestamp: u32,
    /// The number of mounts since the last consistency check.
    pub mount_count_since_fsck: u16,
    /// The number of mounts allowed before a consistency check must be done.
    pub mount_count_before_fsck: u16,
    /// The ext2 signature.
    pub signature: u16,
    /// The filesystem's state.
    pub fs_state: u16,
    /// The action to perform when an error is detected.
    pub error_action: u16,
    /// The minor version.
    pub minor_version: u16,
    /// The timestamp of the last consistency check.
    pub last_fsck_timestamp: u32,
    /// The interval between mandatory consistency checks.
    pub fsck_interval: u32,
    /// The id of the operating system from which the filesystem was created.
    pub os_id: u32,
    /// The major version.
    pub major_version: u32,
    /// The UID of the user that can use reserved blocks.
    pub uid_reserved: u16,
    /// The GID of the group that can use reserved blocks.
    pub gid_reserved: u16,

    // Extended superblock fields
    /// The first non reserved inode.
    pub first_non_reserved_inode: u32,
    /// The size of the inode structure in bytes.
    pub inode_size: u16,
    /// The block group containing the superblock.
    pub superblock_group: u16,
    /// Optional features for the implementation to support.
    pub optional_features: u32,
    /// Required features for the implementation to support.
    pub required_features: u32,
    /// Required features for the implementation to support for writing.
    pub write_required_features: u32,
    /// The filesystem id.
    pub filesystem_id: [u8; 16],
    /// The volume name.
    pub volume_name: [u8; 16],
    /// The path the volume was last mounted to.
    pub last_mount_path: [u8; 64],
    /// Used compression algorithms.
    pub compression_algorithms: u32,
    /// The number of blocks to preallocate for files.
    pub files_preallocate_count: u8,
    /// The number of blocks to preallocate for directories.
    pub directories_preallocate_count: u8,
    /// Unused.
    pub _unused: u16,
    /// The journal ID.
    pub journal_id: [u8; 16],
    /// The journal inode.
    pub journal_inode: u32,
    /// The journal device.
    pub journal_device: u32,
    /// The head of orphan inodes list.
    pub orphan_inode_head: u32,

    /// Structure padding.
    pub _padding: [u8; 788],
}

/// Returns the string stored in the given NUL-padded byte field.
fn field_str(field: &[u8]) -> String {
    let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len]).into_owned()
}

impl Superblock {
    /// Creates a new instance by reading from the given device.
    pub fn read(dev: &mut Device) -> Result<Self> {
        unsafe { dev.read_struct::<Self>(SUPERBLOCK_OFFSET) }
    }

    /// Writes the superblock on the device.
    pub fn write(&self, dev: &mut Device) -> Result<()> {
        dev.write_struct(self, SUPERBLOCK_OFFSET)
    }

    /// Tells whether the superblock is valid.
    pub fn is_valid(&self) -> bool {
        self.signature == EXT2_SIGNATURE
    }

    /// Returns the size of a block.
    pub fn get_block_size(&self) -> u32 {
        1024 << self.block_size_log
    }

    /// Returns the size of a fragment.
    pub fn get_fragment_size(&self) -> u32 {
        1024 << self.fragment_size_log
    }

    /// Returns the block offset of the Block Group Descriptor Table.
    ///
    /// The table follows the superblock: block `2` with 1024 byte blocks,
    /// block `1` with larger blocks.
    pub fn get_bgdt_offset(&self) -> u32 {
        (SUPERBLOCK_OFFSET / self.get_block_size() as u64) as u32 + 1
    }

    /// Returns the number of block groups.
    pub fn get_groups_count(&self) -> u32 {
        self.total_blocks.div_ceil(self.blocks_per_group)
    }

    /// Returns the size of an inode.
    pub fn get_inode_size(&self) -> u16 {
        if self.major_version >= 1 {
            self.inode_size
        } else {
            128
        }
    }

    /// Returns the first inode that isn't reserved.
    pub fn get_first_available_inode(&self) -> u32 {
        if self.major_version >= 1 {
            self.first_non_reserved_inode
        } else {
            11
        }
    }

    /// Returns the number of blocks the inode table occupies in each group.
    pub fn get_inode_blocks_per_group(&self) -> u32 {
        self.get_inode_size() as u32 * self.inodes_per_group / self.get_block_size()
    }

    /// Tells whether directory entries carry a file type field.
    ///
    /// The engine requires this feature to be able to tell entries apart
    /// without reading every inode.
    pub fn has_filetype_feature(&self) -> bool {
        self.major_version >= 1 && self.required_features & REQUIRED_FEATURE_DIRECTORY_TYPE != 0
    }

    /// Returns the volume name, if any.
    pub fn get_volume_name(&self) -> Option<String> {
        if self.major_version < 1 {
            return None;
        }
        Some(field_str(&self.volume_name)).filter(|s| !s.is_empty())
    }

    /// Returns the path the filesystem was last mounted to, if any.
    pub fn get_last_mount_path(&self) -> Option<String> {
        if self.major_version < 1 {
            return None;
        }
        Some(field_str(&self.last_mount_path)).filter(|s| !s.is_empty())
    }

    /// Returns the filesystem's UUID formatted as `8-4-4-4-12` hexadecimal,
    /// if the superblock carries one.
    pub fn get_uuid_string(&self) -> Option<String> {
        if self.major_version < 1 {
            return None;
        }
        Some(Uuid::from_bytes(self.filesystem_id).to_string())
    }
}
