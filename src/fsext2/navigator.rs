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

//! A cursor over the directory tree.
//!
//! The navigator keeps a stack of directories whose base is always the root.
//! `..` pops a frame instead of chasing parent pointers, so the tree can be
//! walked without back references.

use crate::dirent::Directory;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::inode::FileType;
use crate::Fs;

/// One level of the navigator's stack.
#[derive(Clone, Debug)]
struct Frame {
    /// The name the directory was entered by. Empty for the root.
    name: String,
    /// The directory itself.
    dir: Directory,
}

/// A stateful cursor over the directory tree, analogous to a current working
/// directory.
#[derive(Clone, Debug)]
pub struct Navigator {
    /// The stack of directories, from the root to the current one.
    stack: Vec<Frame>,
}

impl Navigator {
    /// Creates a navigator whose base, and current directory, is `root`.
    pub fn new(root: Directory) -> Self {
        Self {
            stack: vec![Frame {
                name: String::new(),
                dir: root,
            }],
        }
    }

    /// Returns the current directory.
    pub fn current(&self) -> &Directory {
        &self.stack.last().unwrap().dir
    }

    /// Returns the current directory, mutably.
    pub fn current_mut(&mut self) -> &mut Directory {
        &mut self.stack.last_mut().unwrap().dir
    }

    /// Moves the cursor along `path`.
    ///
    /// An empty path is a no-op. An absolute path starts over from the root.
    /// `.` stays in place and `..` moves one level up, staying put at the
    /// root. On any error the cursor is left where it was.
    pub fn navigate(&mut self, fs: &mut Fs, path: &str) -> Result<()> {
        let mut copy = self.clone();
        copy.walk(fs, path)?;
        *self = copy;
        Ok(())
    }

    /// The walking loop behind [`Navigator::navigate`], mutating the stack
    /// as it goes.
    fn walk(&mut self, fs: &mut Fs, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        let path = if path.len() > 1 {
            path.strip_suffix('/').unwrap_or(path)
        } else {
            path
        };
        if let Some(rest) = path.strip_prefix('/') {
            self.stack.truncate(1);
            return self.walk(fs, rest);
        }
        let (component, rest) = match path.split_once('/') {
            Some((c, r)) => (c, r),
            None => (path, ""),
        };
        match component {
            "." => {}
            ".." => {
                if self.stack.len() > 1 {
                    self.stack.pop();
                }
            }
            name => {
                let (inode, kind) = {
                    let ent = self.current().entry(name).ok_or(Error::NotFound)?;
                    (ent.inode, ent.kind)
                };
                if kind != FileType::Directory {
                    return Err(Error::NotADirectory);
                }
                let dir = Directory::load(fs, inode)?;
                self.stack.push(Frame {
                    name: name.to_owned(),
                    dir,
                });
            }
        }
        self.walk(fs, rest)
    }

    /// Returns the path of the current directory, `/` separated, starting
    /// with `/`.
    pub fn path_string(&self) -> String {
        if self.stack.len() == 1 {
            return "/".to_owned();
        }
        let mut path = String::new();
        for frame in &self.stack[1..] {
            path.push('/');
            path.push_str(&frame.name);
        }
        path
    }

    /// Resolves `path` to an entry, without moving the cursor.
    ///
    /// The directory part of the path is walked on a scratch copy of the
    /// cursor, then the final component is looked up there. A path ending
    /// with `/` resolves to the directory itself.
    pub fn entry(&self, fs: &mut Fs, path: &str) -> Result<Entry> {
        match path.rfind('/') {
            Some(i) => {
                let mut nav = self.clone();
                let dir_part = if i == 0 { "/" } else { &path[..i] };
                nav.walk(fs, dir_part)?;
                let name = &path[i + 1..];
                if name.is_empty() {
                    let frame = nav.stack.last().unwrap();
                    let (name, inode_no) = (frame.name.clone(), frame.dir.inode_no);
                    Entry::load(fs, &name, inode_no)
                } else {
                    let ent = nav.current().entry(name).ok_or(Error::NotFound)?;
                    Entry::load(fs, name, ent.inode)
                }
            }
            None => {
                let ent = self.current().entry(path).ok_or(Error::NotFound)?;
                Entry::load(fs, path, ent.inode)
            }
        }
    }
}
