//! Extended attributes, kept per path in memory.
//!
//! Attributes follow the node through `rename` and disappear with it on
//! `unlink`, `rmdir` or when its process table is reaped.

use std::collections::BTreeMap;

use crate::fs_op::path::VarPath;

#[derive(Debug, Default)]
pub struct XattrStore {
    attrs: BTreeMap<VarPath, BTreeMap<String, Vec<u8>>>,
}

impl XattrStore {
    pub fn get(&self, path: &VarPath, name: &str) -> Option<&[u8]> {
        self.attrs.get(path)?.get(name).map(Vec::as_slice)
    }

    pub fn set(&mut self, path: &VarPath, name: &str, value: &[u8]) {
        self.attrs
            .entry(path.clone())
            .or_default()
            .insert(name.to_string(), value.to_vec());
    }

    pub fn list(&self, path: &VarPath) -> Vec<String> {
        self.attrs
            .get(path)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove one attribute; `true` if it existed.
    pub fn remove(&mut self, path: &VarPath, name: &str) -> bool {
        let Some(per_path) = self.attrs.get_mut(path) else {
            return false;
        };
        let existed = per_path.remove(name).is_some();
        if per_path.is_empty() {
            self.attrs.remove(path);
        }
        existed
    }

    /// Carry every attribute of `from` over to `to`, replacing what `to` had.
    pub fn rename(&mut self, from: &VarPath, to: &VarPath) {
        self.attrs.remove(to);
        if let Some(moved) = self.attrs.remove(from) {
            self.attrs.insert(to.clone(), moved);
        }
    }

    pub fn forget(&mut self, path: &VarPath) {
        self.attrs.remove(path);
    }

    /// Drop attributes of a process directory and everything under it.
    pub fn forget_pid(&mut self, pid: u32) {
        self.attrs.retain(|path, _| path.pid() != Some(pid));
    }

    pub fn clear(&mut self) {
        self.attrs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_follow_renames() {
        let mut x = XattrStore::default();
        let a = VarPath::variable(1, "A");
        let b = VarPath::variable(1, "B");
        x.set(&a, "user.note", b"hi");
        x.set(&b, "user.stale", b"old");
        x.rename(&a, &b);
        assert!(x.list(&a).is_empty());
        assert_eq!(x.list(&b), vec!["user.note".to_string()]);
        assert_eq!(x.get(&b, "user.note"), Some(&b"hi"[..]));
    }

    #[test]
    fn forget_pid_spares_other_processes() {
        let mut x = XattrStore::default();
        x.set(&VarPath::Process(1), "user.a", b"1");
        x.set(&VarPath::variable(1, "V"), "user.a", b"1");
        x.set(&VarPath::variable(2, "V"), "user.a", b"2");
        x.forget_pid(1);
        assert!(x.list(&VarPath::Process(1)).is_empty());
        assert_eq!(x.list(&VarPath::variable(2, "V")).len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let mut x = XattrStore::default();
        let p = VarPath::Root;
        x.set(&p, "user.k", b"v");
        assert!(x.remove(&p, "user.k"));
        assert!(!x.remove(&p, "user.k"));
    }
}
