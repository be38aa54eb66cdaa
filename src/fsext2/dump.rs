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

//! Human readable dump of the filesystem's metadata, in the manner of
//! `dumpe2fs(8)`.

use crate::bgd::GroupDescriptor;
use crate::bitmap::Bitmap;
use crate::error::Result;
use crate::superblock::{
    ERR_ACTION_IGNORE, ERR_ACTION_KERNEL_PANIC, ERR_ACTION_READ_ONLY, FS_STATE_CLEAN,
    FS_STATE_ERROR, OPTIONAL_FEATURE_HASH_INDEX, OPTIONAL_FEATURE_INODE_EXTENDED,
    OPTIONAL_FEATURE_JOURNAL, OPTIONAL_FEATURE_RESIZE, REQUIRED_FEATURE_COMPRESSION,
    REQUIRED_FEATURE_DIRECTORY_TYPE, WRITE_REQUIRED_64_BITS, WRITE_REQUIRED_DIRECTORY_BINARY_TREE,
    WRITE_REQUIRED_SPARSE_SUPERBLOCKS,
};
use crate::Fs;
use chrono::DateTime;
use std::fmt::Write;

/// Returns the names of the set bits of `flags`, space separated.
fn flag_names(flags: u32, names: &[(u32, &str)]) -> String {
    let mut out = String::new();
    for (bit, name) in names {
        if flags & bit != 0 {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(name);
        }
    }
    out
}

/// Formats an epoch timestamp as `Day Mon DD HH:MM:SS YYYY`.
fn format_time(ts: u32) -> String {
    DateTime::from_timestamp(ts as i64, 0)
        .map(|t| t.format("%a %b %d %H:%M:%S %Y").to_string())
        .unwrap_or_else(|| "Unknown".to_owned())
}

/// Formats the runs of free items of `bitmap` as `a, b-c, d`, offsetting
/// every index by `base`. Returns `None` when nothing is free.
fn free_ranges(bitmap: &Bitmap, base: u32) -> String {
    let mut out = String::new();
    let len = bitmap.len();
    let mut begin = 0;
    while begin < len {
        while begin < len && bitmap.is_set(begin) {
            begin += 1;
        }
        if begin == len {
            break;
        }
        let mut end = begin;
        while end < len && !bitmap.is_set(end) {
            end += 1;
        }
        if !out.is_empty() {
            out.push_str(", ");
        }
        if end - 1 == begin {
            let _ = write!(out, "{}", begin + base);
        } else {
            let _ = write!(out, "{}-{}", begin + base, end - 1 + base);
        }
        begin = end;
    }
    if out.is_empty() {
        "None".to_owned()
    } else {
        out
    }
}

impl Fs {
    /// Renders the filesystem's metadata as text: the superblock's fields
    /// followed by one section per block group.
    pub fn dumpe2fs(&mut self) -> Result<String> {
        let sp = self.sp.clone();
        let mut out = String::new();

        let volume_name = sp.get_volume_name().unwrap_or_else(|| "<none>".to_owned());
        let last_mounted = sp
            .get_last_mount_path()
            .unwrap_or_else(|| "<none>".to_owned());
        let uuid = sp.get_uuid_string().unwrap_or_else(|| "<none>".to_owned());
        let features = [
            flag_names(
                sp.optional_features,
                &[
                    (OPTIONAL_FEATURE_JOURNAL, "has_journal"),
                    (OPTIONAL_FEATURE_INODE_EXTENDED, "ext_attr"),
                    (OPTIONAL_FEATURE_RESIZE, "resize_inode"),
                    (OPTIONAL_FEATURE_HASH_INDEX, "dir_index"),
                ],
            ),
            flag_names(
                sp.required_features,
                &[
                    (REQUIRED_FEATURE_COMPRESSION, "compression"),
                    (REQUIRED_FEATURE_DIRECTORY_TYPE, "filetype"),
                ],
            ),
            flag_names(
                sp.write_required_features,
                &[
                    (WRITE_REQUIRED_SPARSE_SUPERBLOCKS, "sparse_super"),
                    (WRITE_REQUIRED_64_BITS, "large_file"),
                    (WRITE_REQUIRED_DIRECTORY_BINARY_TREE, "dir_btree"),
                ],
            ),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
        let state = match sp.fs_state {
            FS_STATE_CLEAN => "clean",
            FS_STATE_ERROR => "errors",
            _ => "Unknown",
        };
        let errors = match sp.error_action {
            ERR_ACTION_IGNORE => "ignore",
            ERR_ACTION_READ_ONLY => "remount_readonly",
            ERR_ACTION_KERNEL_PANIC => "panic",
            _ => "Unknown",
        };
        let os = match sp.os_id {
            0 => "Linux",
            1 => "HURD",
            2 => "MASIX",
            3 => "FreeBSD",
            4 => "Lites",
            _ => "Unknown",
        };

        let _ = writeln!(out, "Filesystem volume name: {volume_name}");
        let _ = writeln!(out, "Last mounted on: {last_mounted}");
        let _ = writeln!(out, "Filesystem UUID: {uuid}");
        let _ = writeln!(out, "FileSystem Magic Number: 0x{:x}", sp.signature);
        let _ = writeln!(out, "Filesystem revision #: {}", sp.major_version);
        let _ = writeln!(out, "Filesystem features: {features}");
        let _ = writeln!(out, "Filesystem state: {state}");
        let _ = writeln!(out, "Errors behavior: {errors}");
        let _ = writeln!(out, "Filesystem OS type: {os}");
        let _ = writeln!(out, "Inode count: {}", sp.total_inodes);
        let _ = writeln!(out, "Block count: {}", sp.total_blocks);
        let _ = writeln!(out, "Reserved block count: {}", sp.superuser_blocks);
        let _ = writeln!(out, "Overhead clusters: {}", self.overhead_blocks);
        let _ = writeln!(out, "Free blocks: {}", sp.total_unallocated_blocks);
        let _ = writeln!(out, "Free inodes: {}", sp.total_unallocated_inodes);
        let _ = writeln!(out, "First block: {}", sp.superblock_block_number);
        let _ = writeln!(out, "Block size: {}", sp.get_block_size());
        let _ = writeln!(out, "Fragment size: {}", sp.get_fragment_size());
        let _ = writeln!(out, "Reserved GDT blocks: {}", self.reserved_gdt_blocks);
        let _ = writeln!(out, "Blocks per group: {}", sp.blocks_per_group);
        let _ = writeln!(out, "Fragments per group: {}", sp.fragments_per_group);
        let _ = writeln!(out, "Inodes per group: {}", sp.inodes_per_group);
        let _ = writeln!(
            out,
            "Inode blocks per group: {}",
            sp.get_inode_blocks_per_group()
        );
        let _ = writeln!(
            out,
            "Last mount time: {}",
            format_time(sp.last_mount_timestamp)
        );
        let _ = writeln!(
            out,
            "Last write time: {}",
            format_time(sp.last_write_timestamp)
        );
        let _ = writeln!(out, "Mount count: {}", sp.mount_count_since_fsck);
        let _ = writeln!(out, "Maximum mount count: {}", sp.mount_count_before_fsck);
        let _ = writeln!(out, "Last checked: {}", format_time(sp.last_fsck_timestamp));
        let _ = writeln!(out, "Check interval: {}", sp.fsck_interval);
        let _ = writeln!(out, "Reserved blocks uid: {}", sp.uid_reserved);
        let _ = writeln!(out, "Reserved blocks gid: {}", sp.gid_reserved);
        let _ = writeln!(out, "First inode: {}", sp.get_first_available_inode());
        let _ = writeln!(out, "Inode size: {}", sp.get_inode_size());
        out.push('\n');

        let ibpg = sp.get_inode_blocks_per_group();
        for group in 0..sp.get_groups_count() {
            let bgd = GroupDescriptor::read(group, &sp, &mut self.dev)?;
            let start = group * sp.blocks_per_group + sp.superblock_block_number;
            let end = (start + sp.blocks_per_group - 1).min(sp.total_blocks);
            let sb_kind = if group == 0 { "Primary" } else { "Backup" };

            let block_bitmap = self.read_block_bitmap(group)?;
            let inode_bitmap = self.read_inode_bitmap(group)?;
            let free_blocks = free_ranges(&block_bitmap, start);
            let free_inodes = free_ranges(&inode_bitmap, group * sp.inodes_per_group + 1);

            let _ = writeln!(out, "Group {group}: (Blocks {start}-{end})");
            let _ = writeln!(
                out,
                "\t{sb_kind} superblock at {start}, Group descriptors at {}-{}",
                start + 1,
                start + 1
            );
            let _ = writeln!(
                out,
                "\tReserved GDT blocks at {}-{}",
                start + 2,
                bgd.block_usage_bitmap_addr.saturating_sub(1)
            );
            let _ = writeln!(
                out,
                "\tBlock bitmap at {} (+{})",
                bgd.block_usage_bitmap_addr,
                bgd.block_usage_bitmap_addr - start
            );
            let _ = writeln!(
                out,
                "\tInode bitmap at {} (+{})",
                bgd.inode_usage_bitmap_addr,
                bgd.inode_usage_bitmap_addr - start
            );
            let _ = writeln!(
                out,
                "\tInode table at {}-{} (+{})",
                bgd.inode_table_start_addr,
                bgd.inode_table_start_addr + ibpg - 1,
                bgd.inode_table_start_addr - start
            );
            let _ = writeln!(
                out,
                "\t{} free blocks, {} free inodes, {} directories",
                bgd.unallocated_blocks_number,
                bgd.unallocated_inodes_number,
                bgd.directories_number
            );
            let _ = writeln!(out, "\tFree blocks: {free_blocks}");
            let _ = writeln!(out, "\tFree inodes: {free_inodes}");
        }

        Ok(out)
    }
}
