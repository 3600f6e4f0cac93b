//! `fuser::Filesystem` over the shared adapter.
//!
//! Inode numbers are translated to mount paths here and every call is
//! forwarded to [`VarFilesystem`]; errors travel back as errnos.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;

use crate::errors::VarsError;
use crate::fs_op::adapter::FilesystemAdapter;
use crate::fs_op::ops::VarFilesystem;
use crate::fs_op::path::VarPath;
use crate::fs_op::stat::{AttrChange, NodeKind, VarAttr, STATFS_BLOCK_SIZE};
use crate::mount::inodes::{InodeTable, ROOT_INO};
use crate::mount::reaper::lock;
use crate::mount::SessionEnd;

/// Attribute cache lifetime handed to the kernel. Kept short: the reaper
/// removes nodes behind the kernel's back.
const TTL: Duration = Duration::from_secs(1);

pub struct VarsFs {
    adapter: Arc<Mutex<FilesystemAdapter>>,
    inodes: InodeTable,
    unmounted: Option<mpsc::Sender<SessionEnd>>,
}

impl VarsFs {
    pub fn new(adapter: Arc<Mutex<FilesystemAdapter>>) -> Self {
        VarsFs {
            adapter,
            inodes: InodeTable::default(),
            unmounted: None,
        }
    }

    /// Send [`SessionEnd::Unmounted`] on `tx` once the kernel session ends,
    /// whoever unmounted it.
    pub fn notify_unmount(mut self, tx: mpsc::Sender<SessionEnd>) -> Self {
        self.unmounted = Some(tx);
        self
    }

    fn path_of(&self, ino: u64) -> Result<VarPath, c_int> {
        self.inodes.path(ino).cloned().ok_or(libc::ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<VarPath, c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        self.inodes.path(parent).ok_or(libc::ENOENT)?.join(name).map_err(errno)
    }

    /// Like `child_of`, but a name that cannot exist is reported as
    /// missing rather than invalid.
    fn lookup_child(&self, parent: u64, name: &OsStr) -> Result<VarPath, c_int> {
        let name = name.to_str().ok_or(libc::ENOENT)?;
        let parent = self.inodes.path(parent).ok_or(libc::ENOENT)?;
        parent.join(name).map_err(|err| {
            tracing::trace!(error = %err, "lookup of impossible name");
            err.lookup_errno()
        })
    }

    fn attr_of(&mut self, path: &VarPath) -> Result<FileAttr, c_int> {
        let attr = lock(&self.adapter).getattr(&path.to_string()).map_err(errno)?;
        Ok(file_attr(self.inodes.ino_for(path), &attr))
    }
}

fn errno(err: VarsError) -> c_int {
    tracing::debug!(error = %err, "call failed");
    err.errno()
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
        NodeKind::Symlink => FileType::Symlink,
    }
}

fn file_attr(ino: u64, attr: &VarAttr) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(u64::from(STATFS_BLOCK_SIZE)),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: file_type(attr.kind),
        perm: (attr.perm & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: STATFS_BLOCK_SIZE,
        flags: 0,
    }
}

fn time_of(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// xattr replies: a zero `size` asks for the length only.
fn reply_sized(reply: ReplyXattr, size: u32, bytes: &[u8]) {
    let Ok(len) = u32::try_from(bytes.len()) else {
        return reply.error(libc::E2BIG);
    };
    if size == 0 {
        reply.size(len);
    } else if len > size {
        reply.error(libc::ERANGE);
    } else {
        reply.data(bytes);
    }
}

macro_rules! try_reply {
    ($reply:expr, $result:expr) => {
        match $result {
            Ok(v) => v,
            Err(code) => return $reply.error(code),
        }
    };
}

impl Filesystem for VarsFs {
    fn destroy(&mut self) {
        tracing::info!(inodes = self.inodes.len(), "filesystem unmounted");
        if let Some(tx) = self.unmounted.take() {
            let _ = tx.send(SessionEnd::Unmounted);
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = try_reply!(reply, self.lookup_child(parent, name));
        let attr = try_reply!(reply, self.attr_of(&path));
        reply.entry(&TTL, &attr, 0);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        self.inodes.forget_ino(ino);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = try_reply!(reply, self.path_of(ino));
        let attr = try_reply!(reply, self.attr_of(&path));
        reply.attr(&TTL, &attr);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = try_reply!(reply, self.path_of(ino));
        let change = AttrChange {
            size,
            mode,
            uid,
            gid,
            atime: atime.map(time_of),
            mtime: mtime.map(time_of),
        };
        try_reply!(
            reply,
            lock(&self.adapter).set_attributes(&path.to_string(), &change).map_err(errno)
        );
        let attr = try_reply!(reply, self.attr_of(&path));
        reply.attr(&TTL, &attr);
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = try_reply!(reply, self.path_of(ino));
        let target = try_reply!(reply, lock(&self.adapter).readlink(&path.to_string()).map_err(errno));
        reply.data(target.as_bytes());
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let path = try_reply!(reply, self.child_of(parent, name));
        try_reply!(reply, lock(&self.adapter).mkdir(&path.to_string(), mode & !umask).map_err(errno));
        let attr = try_reply!(reply, self.attr_of(&path));
        reply.entry(&TTL, &attr, 0);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.child_of(parent, name));
        try_reply!(reply, lock(&self.adapter).unlink(&path.to_string()).map_err(errno));
        self.inodes.forget_path(&path);
        reply.ok();
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.child_of(parent, name));
        try_reply!(reply, lock(&self.adapter).rmdir(&path.to_string()).map_err(errno));
        self.inodes.forget_path(&path);
        reply.ok();
    }

    fn symlink(&mut self, _req: &Request<'_>, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
        let path = try_reply!(reply, self.child_of(parent, link_name));
        let target = try_reply!(reply, target.to_str().ok_or(libc::EINVAL));
        try_reply!(reply, lock(&self.adapter).symlink(&path.to_string(), target).map_err(errno));
        let attr = try_reply!(reply, self.attr_of(&path));
        reply.entry(&TTL, &attr, 0);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = try_reply!(reply, self.child_of(parent, name));
        let to = try_reply!(reply, self.child_of(newparent, newname));
        try_reply!(
            reply,
            lock(&self.adapter).rename(&from.to_string(), &to.to_string()).map_err(errno)
        );
        self.inodes.rename(&from, &to);
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = try_reply!(reply, self.path_of(ino));
        let fh = try_reply!(reply, lock(&self.adapter).open(&path.to_string()).map_err(errno));
        reply.opened(fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = try_reply!(reply, self.path_of(ino));
        let offset = try_reply!(reply, u64::try_from(offset).map_err(|_| libc::EINVAL));
        let data = try_reply!(
            reply,
            lock(&self.adapter)
                .read(&path.to_string(), size as usize, offset)
                .map_err(errno)
        );
        reply.data(&data);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = try_reply!(reply, self.path_of(ino));
        let offset = try_reply!(reply, u64::try_from(offset).map_err(|_| libc::EINVAL));
        let written = try_reply!(
            reply,
            lock(&self.adapter).write(&path.to_string(), data, offset).map_err(errno)
        );
        let written = try_reply!(reply, u32::try_from(written).map_err(|_| libc::EFBIG));
        reply.written(written);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        try_reply!(reply, lock(&self.adapter).release(fh).map_err(errno));
        reply.ok();
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = try_reply!(reply, self.path_of(ino));
        let children = try_reply!(reply, lock(&self.adapter).readdir(&path.to_string()).map_err(errno));

        let parent_ino = path.parent().map_or(ROOT_INO, |p| self.inodes.ino_for(&p));
        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for child in children {
            let child_path = try_reply!(reply, path.join(&child.name).map_err(errno));
            entries.push((self.inodes.ino_for(&child_path), file_type(child.kind), child.name));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            // `add` reports a full buffer; the kernel comes back with the
            // offset of the next entry.
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let s = try_reply!(reply, lock(&self.adapter).statfs("/").map_err(errno));
        reply.statfs(
            s.blocks,
            s.blocks_free,
            s.blocks_avail,
            s.files,
            s.files_free,
            s.block_size,
            s.name_max,
            s.block_size,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path = try_reply!(reply, self.path_of(ino));
        let name = try_reply!(reply, name.to_str().ok_or(libc::EINVAL));
        try_reply!(
            reply,
            lock(&self.adapter).setxattr(&path.to_string(), name, value).map_err(errno)
        );
        reply.ok();
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let path = try_reply!(reply, self.path_of(ino));
        let name = try_reply!(reply, name.to_str().ok_or(libc::EINVAL));
        let value = try_reply!(reply, lock(&self.adapter).getxattr(&path.to_string(), name).map_err(errno));
        reply_sized(reply, size, &value);
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let path = try_reply!(reply, self.path_of(ino));
        let names = try_reply!(reply, lock(&self.adapter).listxattr(&path.to_string()).map_err(errno));
        let mut packed = Vec::new();
        for name in names {
            packed.extend_from_slice(name.as_bytes());
            packed.push(0);
        }
        reply_sized(reply, size, &packed);
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.path_of(ino));
        let name = try_reply!(reply, name.to_str().ok_or(libc::EINVAL));
        try_reply!(
            reply,
            lock(&self.adapter).removexattr(&path.to_string(), name).map_err(errno)
        );
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = try_reply!(reply, self.child_of(parent, name));
        let fh = try_reply!(
            reply,
            lock(&self.adapter).create(&path.to_string(), mode & !umask).map_err(errno)
        );
        let attr = try_reply!(reply, self.attr_of(&path));
        reply.created(&TTL, &attr, 0, fh, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars_fs() -> VarsFs {
        VarsFs::new(Arc::new(Mutex::new(FilesystemAdapter::default())))
    }

    #[test]
    fn lookup_of_non_pid_names_is_enoent() {
        let fs = vars_fs();
        assert_eq!(fs.lookup_child(ROOT_INO, OsStr::new(".Trash")).unwrap_err(), libc::ENOENT);
        assert_eq!(fs.lookup_child(ROOT_INO, OsStr::new("foo")).unwrap_err(), libc::ENOENT);
        assert_eq!(fs.lookup_child(ROOT_INO, OsStr::new("12")).unwrap(), VarPath::Process(12));
        assert_eq!(fs.child_of(ROOT_INO, OsStr::new("foo")).unwrap_err(), libc::EINVAL);
    }

    #[test]
    fn destroy_reports_the_unmount_once() {
        let (tx, rx) = mpsc::channel();
        let mut fs = vars_fs().notify_unmount(tx);
        fs.destroy();
        fs.destroy();
        assert_eq!(rx.try_recv().unwrap(), SessionEnd::Unmounted);
        assert!(rx.try_recv().is_err());
    }
}
