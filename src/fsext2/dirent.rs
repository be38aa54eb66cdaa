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

//! A directory entry is a record stored in the content of a directory inode,
//! mapping a name to an inode.
//!
//! Records are variable length and 4 byte aligned: a fixed 8 byte header
//! `(inode, rec_len, name_len, file_type)` followed by the name. The records
//! of a block always cover it exactly: the last record's `rec_len` is padded
//! up to the end of the block. Appending an entry therefore shrinks the last
//! record to its natural size and gives the reclaimed tail to the new record;
//! when the tail is too small, the directory grows by one block.

use crate::error::{Error, Result};
use crate::inode::{
    DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE, FileType, Inode,
};
use crate::Fs;
use log::warn;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The size of a directory record's fixed header in bytes.
const RECORD_HEADER_SIZE: usize = 8;
/// The alignment of directory records.
const RECORD_ALIGN: usize = 4;

/// Returns the aligned on-disk size of a record whose name is `name_len`
/// bytes long.
fn record_size(name_len: usize) -> usize {
    (RECORD_HEADER_SIZE + name_len).next_multiple_of(RECORD_ALIGN)
}

/// Returns the current timestamp since the Unix epoch, in seconds.
fn timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// The location and target of one directory record.
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// The inode the record points to.
    pub inode: u32,
    /// The type of the target, as stored in the record.
    pub kind: FileType,
    /// The block the record lives in.
    pub block: u32,
    /// The offset of the record inside its block.
    pub offset: u16,
}

/// A directory, with its records loaded in memory.
#[derive(Clone, Debug)]
pub struct Directory {
    /// The directory's inode number.
    pub inode_no: u32,
    /// The directory's inode record.
    pub inode: Inode,
    /// The directory's records, keyed by name.
    pub entries: BTreeMap<String, DirEntry>,
    /// The name of the record holding the block-end padding, target of the
    /// next append.
    last: Option<String>,
}

impl Directory {
    /// Loads the directory with the inode number `inode_no`.
    ///
    /// Returns [`Error::NotADirectory`] if the inode is not a directory.
    pub fn load(fs: &mut Fs, inode_no: u32) -> Result<Self> {
        let inode = fs.read_inode(inode_no)?;
        if inode.get_type() != FileType::Directory {
            return Err(Error::NotADirectory);
        }
        let mut dir = Self {
            inode_no,
            inode,
            entries: BTreeMap::new(),
            last: None,
        };
        for blk in fs.collect_blocks(&inode, false)? {
            dir.parse_block(fs, blk)?;
        }
        Ok(dir)
    }

    /// Parses the directory records of the block `blk` into the entry map.
    fn parse_block(&mut self, fs: &mut Fs, blk: u32) -> Result<()> {
        let blk_size = fs.superblock().get_block_size() as usize;
        let mut buf = vec![0u8; blk_size];
        fs.dev.read_block(blk, &mut buf)?;

        let mut off = 0;
        while off < blk_size {
            let inode = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            let rec_len = u16::from_le_bytes(buf[off + 4..off + 6].try_into().unwrap()) as usize;
            let name_len = buf[off + 6] as usize;
            let file_type = buf[off + 7];
            if rec_len < RECORD_HEADER_SIZE
                || rec_len % RECORD_ALIGN != 0
                || off + rec_len > blk_size
                || RECORD_HEADER_SIZE + name_len > rec_len
            {
                warn!("directory inode {}: malformed record in block {blk} at offset {off}",
                    self.inode_no);
                break;
            }
            // A zero inode is a free record: skip it but keep walking
            if inode != 0 {
                let name = String::from_utf8_lossy(
                    &buf[off + RECORD_HEADER_SIZE..off + RECORD_HEADER_SIZE + name_len],
                )
                .into_owned();
                self.entries.insert(
                    name.clone(),
                    DirEntry {
                        inode,
                        kind: FileType::from_dirent_type(file_type),
                        block: blk,
                        offset: off as u16,
                    },
                );
                self.last = Some(name);
            }
            off += rec_len;
        }
        Ok(())
    }

    /// Returns the record with the given name, if any.
    pub fn entry(&self, name: &str) -> Option<&DirEntry> {
        self.entries.get(name)
    }

    /// Returns the names of the directory's records.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Writes a directory record into `buf` at `off`.
    fn encode_record(
        buf: &mut [u8],
        off: usize,
        inode: u32,
        rec_len: u16,
        file_type: FileType,
        name: &str,
    ) {
        buf[off..off + 4].copy_from_slice(&inode.to_le_bytes());
        buf[off + 4..off + 6].copy_from_slice(&rec_len.to_le_bytes());
        buf[off + 6] = name.len() as u8;
        buf[off + 7] = file_type.to_dirent_type();
        buf[off + RECORD_HEADER_SIZE..off + RECORD_HEADER_SIZE + name.len()]
            .copy_from_slice(name.as_bytes());
    }

    /// Writes the `.` and `..` bootstrap records of a fresh directory into
    /// the block `blk`.
    ///
    /// `self_no` is the directory's own inode, `parent_no` its parent's.
    fn write_bootstrap(fs: &mut Fs, blk: u32, self_no: u32, parent_no: u32) -> Result<()> {
        let blk_size = fs.superblock().get_block_size() as usize;
        let mut buf = vec![0u8; blk_size];
        Self::encode_record(&mut buf, 0, self_no, 12, FileType::Directory, ".");
        Self::encode_record(
            &mut buf,
            12,
            parent_no,
            (blk_size - 12) as u16,
            FileType::Directory,
            "..",
        );
        fs.dev.write_block(blk, &buf)
    }

    /// Appends a record for `(name, inode, file_type)` to the directory's
    /// content, using the padding of the current last record when it is
    /// large enough and growing the directory by one block otherwise.
    fn append_record(
        &mut self,
        fs: &mut Fs,
        name: &str,
        inode: u32,
        file_type: FileType,
    ) -> Result<()> {
        let blk_size = fs.superblock().get_block_size() as usize;
        let curr_size = record_size(name.len());

        let last = self
            .last
            .as_ref()
            .and_then(|n| self.entries.get(n).map(|e| (n.clone(), e.clone())));
        if let Some((last_name, last_entry)) = last {
            let last_size = record_size(last_name.len());
            let new_off = last_entry.offset as usize + last_size;
            if new_off + curr_size <= blk_size {
                // Shrink the last record down to its natural size and put
                // the new one in the reclaimed tail
                fs.dev.write_block_at(
                    last_entry.block,
                    last_entry.offset as u32 + 4,
                    &(last_size as u16).to_le_bytes(),
                )?;
                let mut rec = vec![0u8; curr_size];
                Self::encode_record(
                    &mut rec,
                    0,
                    inode,
                    (blk_size - new_off) as u16,
                    file_type,
                    name,
                );
                fs.dev
                    .write_block_at(last_entry.block, new_off as u32, &rec)?;
                self.entries.insert(
                    name.to_owned(),
                    DirEntry {
                        inode,
                        kind: file_type,
                        block: last_entry.block,
                        offset: new_off as u16,
                    },
                );
                self.last = Some(name.to_owned());
                return Ok(());
            }
        }
        // No room left: the record gets a fresh block to itself
        let mut buf = vec![0u8; blk_size];
        Self::encode_record(&mut buf, 0, inode, blk_size as u16, file_type, name);
        let blk = fs.write_contiguous(&buf, (self.inode_no - 1) / fs.sp.inodes_per_group)?;
        fs.attach_blocks(self.inode_no, &[blk])?;
        let mut dir_inode = fs.read_inode(self.inode_no)?;
        let size = dir_inode.get_size(fs.superblock());
        dir_inode.set_size(fs.superblock(), size + blk_size as u64);
        fs.write_inode(self.inode_no, &dir_inode)?;
        self.inode = dir_inode;
        self.entries.insert(
            name.to_owned(),
            DirEntry {
                inode,
                kind: file_type,
                block: blk,
                offset: 0,
            },
        );
        self.last = Some(name.to_owned());
        Ok(())
    }

    /// Creates a new file of the given type in the directory and returns its
    /// inode number.
    ///
    /// A new directory starts with its `.` and `..` records in a single
    /// freshly allocated block. A new regular file starts empty.
    ///
    /// Returns [`Error::Exists`] if the name is already taken.
    pub fn add_entry(&mut self, fs: &mut Fs, name: &str, file_type: FileType) -> Result<u32> {
        let blk_size = fs.superblock().get_block_size() as usize;
        if name.is_empty() || name.contains('/') || name.len() > u8::MAX as usize
            || record_size(name.len()) > blk_size
        {
            return Err(Error::NotFound);
        }
        if self.entries.contains_key(name) {
            return Err(Error::Exists);
        }
        let hint_group = (self.inode_no - 1) / fs.sp.inodes_per_group;
        let ts = timestamp();

        let inode_no = match file_type {
            FileType::Directory => {
                // The bootstrap block comes first so the inode can point at it
                let blk = fs.write_contiguous(&vec![0u8; blk_size], hint_group)?;
                let mut inode = Inode::new(FileType::Directory, DEFAULT_DIRECTORY_MODE, ts);
                inode.direct_block_ptrs[0] = blk;
                inode.set_size(fs.superblock(), blk_size as u64);
                let inode_no = fs.alloc_inode(&inode, hint_group)?;
                Directory::write_bootstrap(fs, blk, inode_no, self.inode_no)?;
                inode_no
            }
            _ => {
                let inode = Inode::new(file_type, DEFAULT_FILE_MODE, ts);
                fs.alloc_inode(&inode, hint_group)?
            }
        };
        self.append_record(fs, name, inode_no, file_type)?;
        Ok(inode_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::ROOT_DIRECTORY_INODE;
    use crate::testutil;

    #[test]
    fn record_sizes_are_aligned() {
        assert_eq!(record_size(1), 12);
        assert_eq!(record_size(2), 12);
        assert_eq!(record_size(4), 12);
        assert_eq!(record_size(5), 16);
        assert_eq!(record_size(11), 20);
    }

    #[test]
    fn fresh_root_has_bootstrap_records() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let root = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        let dot = root.entry(".").unwrap();
        let dotdot = root.entry("..").unwrap();
        assert_eq!(dot.inode, ROOT_DIRECTORY_INODE);
        assert_eq!(dot.offset, 0);
        assert_eq!(dotdot.inode, ROOT_DIRECTORY_INODE);
        assert_eq!(dotdot.offset, 12);
        testutil::assert_record_layout(&mut fs, &root);
    }

    #[test]
    fn mkdir_bootstraps_child() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let mut root = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        let child_no = root.add_entry(&mut fs, "sub", FileType::Directory).unwrap();

        let child = Directory::load(&mut fs, child_no).unwrap();
        let names: Vec<&str> = child.names().collect();
        assert_eq!(names, [".", ".."]);
        assert_eq!(child.entry(".").unwrap().inode, child_no);
        assert_eq!(child.entry("..").unwrap().inode, ROOT_DIRECTORY_INODE);
        assert_eq!(child.inode.get_size(fs.superblock()), 1024);
        assert_eq!(child.inode.hard_links_count, 1);
        assert_eq!(
            child.inode.get_permissions(),
            DEFAULT_DIRECTORY_MODE
        );
        testutil::assert_record_layout(&mut fs, &child);
    }

    #[test]
    fn append_uses_last_record_padding() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let mut root = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        root.add_entry(&mut fs, "a", FileType::Regular).unwrap();
        root.add_entry(&mut fs, "bb", FileType::Directory).unwrap();

        // Everything still fits in the first block
        let reloaded = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        assert_eq!(reloaded.entries.len(), 4);
        let a = reloaded.entry("a").unwrap();
        let bb = reloaded.entry("bb").unwrap();
        assert_eq!(a.block, bb.block);
        assert_eq!(a.kind, FileType::Regular);
        assert_eq!(bb.kind, FileType::Directory);
        // ".." was shrunk from its padded length to 12 bytes
        assert_eq!(a.offset, 24);
        assert_eq!(bb.offset, 24 + 12);
        testutil::assert_record_layout(&mut fs, &reloaded);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let mut root = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        root.add_entry(&mut fs, "twice", FileType::Regular).unwrap();
        assert!(matches!(
            root.add_entry(&mut fs, "twice", FileType::Regular),
            Err(Error::Exists)
        ));
    }

    #[test]
    fn directory_grows_past_one_block() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let mut root = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        let mut x = {
            let no = root.add_entry(&mut fs, "x", FileType::Directory).unwrap();
            Directory::load(&mut fs, no).unwrap()
        };
        for i in 0..300 {
            x.add_entry(&mut fs, &format!("entry-{i}"), FileType::Directory)
                .unwrap();
        }

        let reloaded = Directory::load(&mut fs, x.inode_no).unwrap();
        assert_eq!(reloaded.entries.len(), 302);
        for i in 0..300 {
            assert!(reloaded.entry(&format!("entry-{i}")).is_some());
        }
        // Multiple blocks now, every one exactly covered by its records
        assert!(reloaded.inode.get_size(fs.superblock()) > 1024);
        testutil::assert_record_layout(&mut fs, &reloaded);
        testutil::assert_block_accounting(&mut fs);
        testutil::assert_inode_accounting(&mut fs);
    }

    #[test]
    fn unknown_file_type_parses() {
        let (_tmp, mut fs) = testutil::scratch_fs();
        let mut root = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        root.add_entry(&mut fs, "odd", FileType::Regular).unwrap();
        // Overwrite the record's type indicator with 0 (unknown)
        let ent = root.entry("odd").unwrap().clone();
        fs.dev
            .write_block_at(ent.block, ent.offset as u32 + 7, &[0u8])
            .unwrap();

        let reloaded = Directory::load(&mut fs, ROOT_DIRECTORY_INODE).unwrap();
        assert_eq!(reloaded.entry("odd").unwrap().kind, FileType::Unknown);
    }
}
