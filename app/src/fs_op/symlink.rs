//! Symbolic links stored inside process directories.
//!
//! Links live beside the variable records of a process but are not
//! variables: they never inherit, persist or type-check. The adapter keeps
//! names unique across records and links.

use std::collections::BTreeMap;
use std::time::SystemTime;

/// One stored link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    pub target: String,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
}

impl Symlink {
    pub fn new(target: impl Into<String>, uid: u32, gid: u32) -> Self {
        Symlink {
            target: target.into(),
            uid,
            gid,
            created: SystemTime::now(),
        }
    }
}

/// Links of every process, keyed by pid then name.
#[derive(Debug, Default)]
pub struct LinkTable {
    links: BTreeMap<u32, BTreeMap<String, Symlink>>,
}

impl LinkTable {
    pub fn get(&self, pid: u32, name: &str) -> Option<&Symlink> {
        self.links.get(&pid)?.get(name)
    }

    pub fn get_mut(&mut self, pid: u32, name: &str) -> Option<&mut Symlink> {
        self.links.get_mut(&pid)?.get_mut(name)
    }

    pub fn contains(&self, pid: u32, name: &str) -> bool {
        self.get(pid, name).is_some()
    }

    /// Store `link`, returning any link it replaced.
    pub fn insert(&mut self, pid: u32, name: &str, link: Symlink) -> Option<Symlink> {
        self.links.entry(pid).or_default().insert(name.to_string(), link)
    }

    pub fn remove(&mut self, pid: u32, name: &str) -> Option<Symlink> {
        let per_pid = self.links.get_mut(&pid)?;
        let removed = per_pid.remove(name);
        if per_pid.is_empty() {
            self.links.remove(&pid);
        }
        removed
    }

    /// `(name, link)` pairs of one process, sorted by name.
    pub fn of(&self, pid: u32) -> impl Iterator<Item = (&str, &Symlink)> {
        self.links
            .get(&pid)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn count(&self, pid: u32) -> usize {
        self.links.get(&pid).map_or(0, BTreeMap::len)
    }

    pub fn total(&self) -> usize {
        self.links.values().map(BTreeMap::len).sum()
    }

    /// Drop every link of `pid`.
    pub fn forget_pid(&mut self, pid: u32) {
        self.links.remove(&pid);
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_scoped_by_pid() {
        let mut t = LinkTable::default();
        assert!(t.insert(1, "home", Symlink::new("/home/a", 0, 0)).is_none());
        t.insert(2, "home", Symlink::new("/home/b", 0, 0));
        assert_eq!(t.get(1, "home").unwrap().target, "/home/a");
        assert_eq!(t.total(), 2);

        t.forget_pid(1);
        assert!(!t.contains(1, "home"));
        assert_eq!(t.count(2), 1);
    }

    #[test]
    fn remove_prunes_empty_pid() {
        let mut t = LinkTable::default();
        t.insert(3, "a", Symlink::new("x", 0, 0));
        assert!(t.remove(3, "a").is_some());
        assert!(t.remove(3, "a").is_none());
        assert_eq!(t.of(3).count(), 0);
    }
}
