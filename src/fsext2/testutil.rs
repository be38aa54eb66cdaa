//! Builds scratch ext2 images for tests.
//!
//! The layout mirrors what a minimal rev 1 formatter produces: superblock,
//! descriptor table, one bitmap block each for blocks and inodes, the inode
//! table, then data. Images are small (1 MiB, 1024 byte blocks) so every
//! test gets a fresh one.

use crate::bgd::GroupDescriptor;
use crate::device::Device;
use crate::dirent::Directory;
use crate::error::Result;
use crate::inode::{
    DEFAULT_DIRECTORY_MODE, FileType, Inode, ROOT_DIRECTORY_INODE,
};
use crate::superblock::{
    EXT2_SIGNATURE, ERR_ACTION_READ_ONLY, FS_STATE_CLEAN, REQUIRED_FEATURE_DIRECTORY_TYPE,
    Superblock,
};
use crate::Fs;
use std::mem::size_of;
use tempfile::NamedTempFile;

/// The size of the scratch images in bytes.
const IMAGE_LEN: u64 = 1024 * 1024;
/// The block size of the scratch images.
const BLOCK_SIZE: u32 = 1024;
/// Blocks per group. Larger than the whole image, so there is one group.
const BLOCKS_PER_GROUP: u32 = 8192;
/// Inodes per group.
const INODES_PER_GROUP: u32 = 512;
/// A fixed timestamp, so dumps are deterministic.
const TIMESTAMP: u32 = 1700000000;

/// Sets the first `end` bits of the bitmap block `blk`.
fn fill_bitmap(dev: &mut Device, blk: u32, end: u32) -> Result<()> {
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    for i in 0..end {
        buf[i as usize / 8] |= 1 << (i % 8);
    }
    dev.write_block(blk, &buf)
}

/// Formats a fresh 1 MiB ext2 filesystem into a temporary file and opens it.
pub(crate) fn scratch_fs() -> (NamedTempFile, Fs) {
    let tmp = NamedTempFile::new().expect("cannot create image file");
    tmp.as_file().set_len(IMAGE_LEN).expect("cannot size image");

    let total_blocks = (IMAGE_LEN / BLOCK_SIZE as u64) as u32;
    let groups_count = total_blocks.div_ceil(BLOCKS_PER_GROUP);
    let total_inodes = INODES_PER_GROUP * groups_count;
    let first_non_reserved_inode = 11;

    let mut sp = Superblock {
        total_inodes,
        total_blocks,
        superuser_blocks: 0,
        total_unallocated_blocks: 0,
        total_unallocated_inodes: 0,
        superblock_block_number: 1024 / BLOCK_SIZE,
        block_size_log: BLOCK_SIZE.trailing_zeros() - 10,
        fragment_size_log: BLOCK_SIZE.trailing_zeros() - 10,
        blocks_per_group: BLOCKS_PER_GROUP,
        fragments_per_group: BLOCKS_PER_GROUP,
        inodes_per_group: INODES_PER_GROUP,
        last_mount_timestamp: TIMESTAMP,
        last_write_timestamp: TIMESTAMP,
        mount_count_since_fsck: 0,
        mount_count_before_fsck: 1000,
        signature: EXT2_SIGNATURE,
        fs_state: FS_STATE_CLEAN,
        error_action: ERR_ACTION_READ_ONLY,
        minor_version: 1,
        last_fsck_timestamp: TIMESTAMP,
        fsck_interval: 2678400,
        os_id: 0,
        major_version: 1,
        uid_reserved: 0,
        gid_reserved: 0,
        first_non_reserved_inode,
        inode_size: 128,
        superblock_group: 0,
        optional_features: 0,
        required_features: REQUIRED_FEATURE_DIRECTORY_TYPE,
        write_required_features: 0,
        filesystem_id: *b"\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c\x0d\x0e\x0f\x10",
        volume_name: *b"scratch\0\0\0\0\0\0\0\0\0",
        last_mount_path: [0; 64],
        compression_algorithms: 0,
        files_preallocate_count: 0,
        directories_preallocate_count: 0,
        _unused: 0,
        journal_id: [0; 16],
        journal_inode: 0,
        journal_device: 0,
        orphan_inode_head: 0,
        _padding: [0; 788],
    };

    let mut dev = Device::open(tmp.path()).expect("cannot open image");
    dev.set_block_size(BLOCK_SIZE);

    // Layout: boot + superblock, descriptor table, then per-group metadata
    let bgdt_offset = sp.get_bgdt_offset();
    let bgdt_size = (groups_count * size_of::<GroupDescriptor>() as u32).div_ceil(BLOCK_SIZE);
    let metadata_off = bgdt_offset + bgdt_size;
    let block_bitmap_addr = metadata_off;
    let inode_bitmap_addr = metadata_off + 1;
    let inode_table_addr = metadata_off + 2;
    let inode_table_size = INODES_PER_GROUP * 128 / BLOCK_SIZE;

    // One block for the root directory's `.` and `..`
    let root_block = inode_table_addr + inode_table_size;
    let used_blocks = root_block + 1;
    let used_inodes = first_non_reserved_inode - 1;

    let bgd = GroupDescriptor {
        block_usage_bitmap_addr: block_bitmap_addr,
        inode_usage_bitmap_addr: inode_bitmap_addr,
        inode_table_start_addr: inode_table_addr,
        unallocated_blocks_number: (total_blocks - used_blocks) as u16,
        unallocated_inodes_number: (total_inodes - used_inodes) as u16,
        directories_number: 1,
        _padding: [0; 14],
    };
    sp.total_unallocated_blocks = total_blocks - used_blocks;
    sp.total_unallocated_inodes = total_inodes - used_inodes;

    sp.write(&mut dev).expect("cannot write superblock");
    bgd.write(0, &sp, &mut dev).expect("cannot write descriptor");
    fill_bitmap(&mut dev, block_bitmap_addr, used_blocks).expect("cannot fill block bitmap");
    fill_bitmap(&mut dev, inode_bitmap_addr, used_inodes).expect("cannot fill inode bitmap");

    let mut root = Inode::new(FileType::Directory, DEFAULT_DIRECTORY_MODE, TIMESTAMP);
    root.direct_block_ptrs[0] = root_block;
    root.set_size(&sp, BLOCK_SIZE as u64);
    root.write(ROOT_DIRECTORY_INODE, &sp, &mut dev)
        .expect("cannot write root inode");

    // Root bootstrap records: `.` and `..` both point at the root
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    encode_record(&mut buf, 0, ROOT_DIRECTORY_INODE, 12, FileType::Directory, ".");
    encode_record(
        &mut buf,
        12,
        ROOT_DIRECTORY_INODE,
        (BLOCK_SIZE - 12) as u16,
        FileType::Directory,
        "..",
    );
    dev.write_block(root_block, &buf)
        .expect("cannot write root directory");
    drop(dev);

    let fs = Fs::open(tmp.path()).expect("cannot open formatted image");
    (tmp, fs)
}

/// Writes a raw directory record. Duplicated here so the formatter does not
/// depend on the codec it is used to test.
fn encode_record(buf: &mut [u8], off: usize, inode: u32, rec_len: u16, kind: FileType, name: &str) {
    buf[off..off + 4].copy_from_slice(&inode.to_le_bytes());
    buf[off + 4..off + 6].copy_from_slice(&rec_len.to_le_bytes());
    buf[off + 6] = name.len() as u8;
    buf[off + 7] = kind.to_dirent_type();
    buf[off + 8..off + 8 + name.len()].copy_from_slice(name.as_bytes());
}

/// Creates a regular file `name` under `dir` holding `data`.
pub(crate) fn write_file(fs: &mut Fs, dir: &mut Directory, name: &str, data: &[u8]) -> u32 {
    let inode_no = dir
        .add_entry(fs, name, FileType::Regular)
        .expect("cannot create file");
    if !data.is_empty() {
        let sp = fs.superblock().clone();
        let blk = fs.write_contiguous(data, 0).expect("cannot write data");
        let count = data.len().div_ceil(sp.get_block_size() as usize) as u32;
        let blocks: Vec<u32> = (blk..blk + count).collect();
        fs.attach_blocks(inode_no, &blocks).expect("cannot attach");
        let mut inode = fs.read_inode(inode_no).expect("cannot read inode");
        inode.set_size(&sp, data.len() as u64);
        fs.write_inode(inode_no, &inode).expect("cannot write inode");
    }
    inode_no
}

/// Formats the canonical fixture: a 1 MiB image whose root holds
/// `lost+found`, `hello.txt` (containing `Hello, world!\n`) and an empty
/// directory `sub`.
pub(crate) fn canonical_fs() -> (NamedTempFile, Fs) {
    let (tmp, mut fs) = scratch_fs();
    let mut root = fs.root().expect("cannot load root");
    root.add_entry(&mut fs, "lost+found", FileType::Directory)
        .expect("cannot create lost+found");
    write_file(&mut fs, &mut root, "hello.txt", b"Hello, world!\n");
    root.add_entry(&mut fs, "sub", FileType::Directory)
        .expect("cannot create sub");
    (tmp, fs)
}

/// Checks that the free-block counters of the superblock, the group
/// descriptors and the bitmaps all agree.
pub(crate) fn assert_block_accounting(fs: &mut Fs) {
    let sp_free = fs.superblock().total_unallocated_blocks;
    let mut bgd_free = 0u32;
    let mut bitmap_free = 0u32;
    for group in 0..fs.superblock().get_groups_count() {
        let sp = fs.superblock().clone();
        let bgd = GroupDescriptor::read(group, &sp, fs.dev_mut()).unwrap();
        bgd_free += bgd.unallocated_blocks_number as u32;
        bitmap_free += fs.read_block_bitmap(group).unwrap().free_count();
    }
    assert_eq!(sp_free, bgd_free, "superblock and descriptors disagree");
    assert_eq!(sp_free, bitmap_free, "superblock and bitmaps disagree");
}

/// Checks that the free-inode counters of the superblock, the group
/// descriptors and the bitmaps all agree.
pub(crate) fn assert_inode_accounting(fs: &mut Fs) {
    let sp_free = fs.superblock().total_unallocated_inodes;
    let mut bgd_free = 0u32;
    let mut bitmap_free = 0u32;
    for group in 0..fs.superblock().get_groups_count() {
        let sp = fs.superblock().clone();
        let bgd = GroupDescriptor::read(group, &sp, fs.dev_mut()).unwrap();
        bgd_free += bgd.unallocated_inodes_number as u32;
        bitmap_free += fs.read_inode_bitmap(group).unwrap().free_count();
    }
    assert_eq!(sp_free, bgd_free, "superblock and descriptors disagree");
    assert_eq!(sp_free, bitmap_free, "superblock and bitmaps disagree");
}

/// Returns the total number of directories accounted by the group
/// descriptors.
pub(crate) fn directories_count(fs: &mut Fs) -> u32 {
    let sp = fs.superblock().clone();
    (0..sp.get_groups_count())
        .map(|g| {
            GroupDescriptor::read(g, &sp, fs.dev_mut())
                .unwrap()
                .directories_number as u32
        })
        .sum()
}

/// Checks the record layout of every block of `dir`: records cover each
/// block exactly, are 4 byte aligned and large enough for their names.
pub(crate) fn assert_record_layout(fs: &mut Fs, dir: &Directory) {
    let blk_size = fs.superblock().get_block_size() as usize;
    let inode = fs.read_inode(dir.inode_no).unwrap();
    for blk in fs.collect_blocks(&inode, false).unwrap() {
        let mut buf = vec![0u8; blk_size];
        fs.dev_mut().read_block(blk, &mut buf).unwrap();
        let mut off = 0;
        while off < blk_size {
            let rec_len = u16::from_le_bytes([buf[off + 4], buf[off + 5]]) as usize;
            let name_len = buf[off + 6] as usize;
            assert!(rec_len >= 8, "record too small in block {blk}");
            assert_eq!(rec_len % 4, 0, "misaligned record in block {blk}");
            assert!(8 + name_len <= rec_len, "name overflows record in block {blk}");
            off += rec_len;
        }
        assert_eq!(off, blk_size, "records do not cover block {blk} exactly");
    }
}
