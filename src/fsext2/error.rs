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

//! Errors returned by the filesystem engine.

use std::io;
use thiserror::Error;

/// An error returned by an operation on the filesystem.
#[derive(Debug, Error)]
pub enum Error {
    /// The image cannot be read or written.
    #[error("bad image: {0}")]
    Image(#[from] io::Error),
    /// The superblock's signature is not the ext2 signature.
    #[error("not an ext2 filesystem")]
    BadMagic,
    /// A feature required to operate on the filesystem is missing.
    #[error("missing required feature `{0}`")]
    MissingFeature(&'static str),
    /// The named entry does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// A directory was expected.
    #[error("not a directory")]
    NotADirectory,
    /// A regular file was expected.
    #[error("not a regular file")]
    NotAFile,
    /// The directory already contains an entry with that name.
    #[error("file exists")]
    Exists,
    /// The filesystem has not enough free blocks left.
    #[error("no space left on device")]
    NoSpace,
    /// No group has a large enough run of consecutive free blocks.
    #[error("no contiguous space left on device")]
    NoContiguousSpace,
    /// The inode's block pointer tree is saturated.
    #[error("file too large")]
    InodeFull,
}

/// The result of an operation on the filesystem.
pub type Result<T> = std::result::Result<T, Error>;
