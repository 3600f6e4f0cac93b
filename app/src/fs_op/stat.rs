use std::time::SystemTime;

/// Block size reported by `statfs`.
pub const STATFS_BLOCK_SIZE: u32 = 512;
/// Total blocks reported by `statfs`.
pub const STATFS_BLOCKS: u64 = 4096;
/// Free and available blocks reported by `statfs`.
pub const STATFS_BLOCKS_FREE: u64 = 2048;
/// Longest name accepted in a directory.
pub const NAME_MAX: u32 = 255;

/// Kind of node exposed by the mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The root or a process table.
    Directory,
    /// A variable record.
    File,
    /// A symbolic link stored in a process directory.
    Symlink,
}

/// Attributes of one node, in the shape `stat(2)` wants them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarAttr {
    pub kind: NodeKind,
    /// Permission bits only; the file type comes from `kind`.
    pub perm: u32,
    pub size: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl VarAttr {
    /// Full `st_mode` including the file type bits.
    pub fn mode(&self) -> u32 {
        let type_bits = match self.kind {
            NodeKind::Directory => libc::S_IFDIR,
            NodeKind::File => libc::S_IFREG,
            NodeKind::Symlink => libc::S_IFLNK,
        };
        type_bits as u32 | (self.perm & 0o7777)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// One entry returned by `readdir`.
/// Changes requested by one `setattr`; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrChange {
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        DirEntry {
            name: name.into(),
            kind,
        }
    }
}

/// Fixed filesystem statistics; only `files` tracks the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_avail: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u32,
}

impl StatFs {
    pub fn with_files(files: u64) -> Self {
        StatFs {
            block_size: STATFS_BLOCK_SIZE,
            blocks: STATFS_BLOCKS,
            blocks_free: STATFS_BLOCKS_FREE,
            blocks_avail: STATFS_BLOCKS_FREE,
            files,
            files_free: u64::from(u32::MAX).saturating_sub(files),
            name_max: NAME_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(kind: NodeKind, perm: u32) -> VarAttr {
        let now = SystemTime::now();
        VarAttr {
            kind,
            perm,
            size: 0,
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    #[test]
    fn mode_carries_type_bits() {
        assert_eq!(attr(NodeKind::Directory, 0o755).mode(), libc::S_IFDIR as u32 | 0o755);
        assert_eq!(attr(NodeKind::File, 0o100644).mode(), libc::S_IFREG as u32 | 0o644);
        assert!(attr(NodeKind::Directory, 0).is_dir());
    }

    #[test]
    fn statfs_constants() {
        let s = StatFs::with_files(3);
        assert_eq!((s.block_size, s.blocks, s.blocks_avail), (512, 4096, 2048));
        assert_eq!(s.files, 3);
    }
}
