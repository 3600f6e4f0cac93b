use std::collections::HashMap;

use crate::fs_op::path::VarPath;

/// Inode of `/`, fixed by FUSE.
pub const ROOT_INO: u64 = 1;

/// Two-way map between kernel inode numbers and mount paths. Numbers are
/// handed out on first sight and never reused.
#[derive(Debug)]
pub struct InodeTable {
    by_ino: HashMap<u64, VarPath>,
    by_path: HashMap<VarPath, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        let mut table = InodeTable {
            by_ino: HashMap::new(),
            by_path: HashMap::new(),
            next: ROOT_INO + 1,
        };
        table.by_ino.insert(ROOT_INO, VarPath::Root);
        table.by_path.insert(VarPath::Root, ROOT_INO);
        table
    }
}

impl InodeTable {
    pub fn path(&self, ino: u64) -> Option<&VarPath> {
        self.by_ino.get(&ino)
    }

    /// Inode of `path`, allocating one if needed.
    pub fn ino_for(&mut self, path: &VarPath) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, path.clone());
        self.by_path.insert(path.clone(), ino);
        ino
    }

    /// Keep the inode of `from` and point it at `to`. Whatever `to` had is
    /// dropped.
    pub fn rename(&mut self, from: &VarPath, to: &VarPath) {
        if let Some(stale) = self.by_path.remove(to) {
            self.by_ino.remove(&stale);
        }
        if let Some(ino) = self.by_path.remove(from) {
            self.by_ino.insert(ino, to.clone());
            self.by_path.insert(to.clone(), ino);
        }
    }

    pub fn forget_path(&mut self, path: &VarPath) {
        if *path == VarPath::Root {
            return;
        }
        if let Some(ino) = self.by_path.remove(path) {
            self.by_ino.remove(&ino);
        }
    }

    pub fn forget_ino(&mut self, ino: u64) {
        if ino == ROOT_INO {
            return;
        }
        if let Some(path) = self.by_ino.remove(&ino) {
            self.by_path.remove(&path);
        }
    }

    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_stable_and_unique() {
        let mut t = InodeTable::default();
        assert_eq!(t.ino_for(&VarPath::Root), ROOT_INO);
        let a = t.ino_for(&VarPath::Process(10));
        let b = t.ino_for(&VarPath::variable(10, "X"));
        assert_ne!(a, b);
        assert_eq!(t.ino_for(&VarPath::Process(10)), a);
        assert_eq!(t.path(b), Some(&VarPath::variable(10, "X")));
    }

    #[test]
    fn rename_keeps_the_number() {
        let mut t = InodeTable::default();
        let from = VarPath::variable(1, "A");
        let to = VarPath::variable(1, "B");
        let a = t.ino_for(&from);
        let b = t.ino_for(&to);
        t.rename(&from, &to);
        assert_eq!(t.ino_for(&to), a);
        assert!(t.path(b).is_none());
        assert_ne!(t.ino_for(&from), a);
    }

    #[test]
    fn root_is_never_forgotten() {
        let mut t = InodeTable::default();
        t.forget_ino(ROOT_INO);
        t.forget_path(&VarPath::Root);
        assert_eq!(t.path(ROOT_INO), Some(&VarPath::Root));
        let x = t.ino_for(&VarPath::Process(2));
        t.forget_ino(x);
        assert_eq!(t.len(), 1);
    }
}
