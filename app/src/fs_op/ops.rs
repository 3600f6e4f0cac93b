use std::time::SystemTime;

use crate::errors::Result;
use crate::fs_op::stat::{DirEntry, StatFs, VarAttr};

/// Filesystem calls served by the variable store, one method per call.
///
/// Paths are absolute mount paths (`/`, `/<pid>`, `/<pid>/<name>`). A
/// mounting layer translates its own addressing into these calls and
/// maps errors through [`VarsError::errno`](crate::errors::VarsError::errno).
pub trait VarFilesystem {
    /// Allocate an empty string record and open it.
    fn create(&mut self, path: &str, mode: u32) -> Result<u64>;
    fn open(&mut self, path: &str) -> Result<u64>;
    /// Close a handle. Unknown handles are ignored.
    fn release(&mut self, fh: u64) -> Result<()>;
    /// Up to `size` bytes from `offset`; empty past the end.
    fn read(&mut self, path: &str, size: usize, offset: u64) -> Result<Vec<u8>>;
    /// Splice `data` at `offset`, zero-filling any gap. Returns the number
    /// of bytes written.
    fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize>;
    fn truncate(&mut self, path: &str, length: u64) -> Result<()>;
    fn unlink(&mut self, path: &str) -> Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    fn getattr(&self, path: &str) -> Result<VarAttr>;
    fn chmod(&mut self, path: &str, mode: u32) -> Result<()>;
    fn chown(&mut self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()>;
    /// `None` leaves that time unchanged.
    fn utimens(&mut self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<()>;

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>>;
    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()>;
    fn rmdir(&mut self, path: &str) -> Result<()>;

    fn symlink(&mut self, path: &str, target: &str) -> Result<()>;
    fn readlink(&self, path: &str) -> Result<String>;

    /// A missing attribute reads as empty.
    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>>;
    fn setxattr(&mut self, path: &str, name: &str, value: &[u8]) -> Result<()>;
    fn listxattr(&self, path: &str) -> Result<Vec<String>>;
    fn removexattr(&mut self, path: &str, name: &str) -> Result<()>;

    fn statfs(&self, path: &str) -> Result<StatFs>;
}
