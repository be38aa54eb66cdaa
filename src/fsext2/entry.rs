//! In-memory view of one filesystem object, loaded from a directory record.

use crate::dirent::Directory;
use crate::error::Result;
use crate::inode::{FileType, Inode};
use crate::Fs;

/// The length below which a symbolic link's target is stored inside the
/// inode's block pointer area instead of a data block.
const SYMLINK_INLINE_LIMIT: u64 = 60;

/// The per-type payload of an entry.
#[derive(Clone, Debug)]
pub enum EntryData {
    /// A regular file and its content.
    File(Vec<u8>),
    /// A directory and its records.
    Directory(Directory),
    /// A symbolic link and its target path.
    Symlink(String),
    /// Any other kind of filesystem object.
    Other(FileType),
}

/// A filesystem object, with its content loaded.
#[derive(Clone, Debug)]
pub struct Entry {
    /// The name the entry was reached by.
    pub name: String,
    /// The entry's inode number.
    pub inode_no: u32,
    /// The entry's inode record.
    pub inode: Inode,
    /// The entry's payload.
    pub data: EntryData,
}

impl Entry {
    /// Loads the entry `name` pointing to the inode `inode_no`.
    pub fn load(fs: &mut Fs, name: &str, inode_no: u32) -> Result<Self> {
        let inode = fs.read_inode(inode_no)?;
        let data = match inode.get_type() {
            FileType::Regular => EntryData::File(fs.read_inode_data(&inode)?),
            FileType::Directory => EntryData::Directory(Directory::load(fs, inode_no)?),
            FileType::Link => EntryData::Symlink(read_symlink_target(fs, &inode)?),
            kind => EntryData::Other(kind),
        };
        Ok(Self {
            name: name.to_owned(),
            inode_no,
            inode,
            data,
        })
    }

    /// Returns the entry's file type.
    pub fn kind(&self) -> FileType {
        self.inode.get_type()
    }
}

/// Reads the target of the symbolic link `inode`.
///
/// Short targets live in the block pointer area of the inode itself; longer
/// ones are stored like regular file content.
fn read_symlink_target(fs: &mut Fs, inode: &Inode) -> Result<String> {
    let size = inode.get_size(fs.superblock());
    if size < SYMLINK_INLINE_LIMIT {
        let mut bytes = Vec::with_capacity(SYMLINK_INLINE_LIMIT as usize);
        for ptr in inode
            .direct_block_ptrs
            .iter()
            .chain([
                &inode.singly_indirect_block_ptr,
                &inode.doubly_indirect_block_ptr,
                &inode.triply_indirect_block_ptr,
            ])
        {
            bytes.extend_from_slice(&ptr.to_le_bytes());
        }
        bytes.truncate(size as usize);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        let data = fs.read_inode_data(inode)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}
