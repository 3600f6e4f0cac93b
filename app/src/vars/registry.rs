use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;

use crate::errors::{Result, VarsError};
use crate::vars::liveness::{Liveness, ProcessProbe, SignalProbe};
use crate::vars::record::VariableRecord;
use crate::vars::table::ProcessVariableTable;

/// Default cap on parent-chain walks.
pub const DEFAULT_MAX_INHERITANCE_DEPTH: usize = 64;

/// Result of one reaping pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DefunctReport {
    /// Pids whose tables were dropped.
    pub removed: Vec<u32>,
    /// Pids kept because the probe could not tell, with the probe's reason.
    pub ambiguous: Vec<(u32, String)>,
}

impl DefunctReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// All process tables, keyed by pid.
pub struct VariableRegistry {
    tables: BTreeMap<u32, ProcessVariableTable>,
    probe: Arc<dyn ProcessProbe>,
    max_depth: usize,
}

impl Default for VariableRegistry {
    fn default() -> Self {
        VariableRegistry::new(Arc::new(SignalProbe), DEFAULT_MAX_INHERITANCE_DEPTH)
    }
}

impl std::fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableRegistry")
            .field("pids", &self.tables.keys().collect::<Vec<_>>())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl VariableRegistry {
    pub fn new(probe: Arc<dyn ProcessProbe>, max_depth: usize) -> Self {
        VariableRegistry {
            tables: BTreeMap::new(),
            probe,
            max_depth: max_depth.max(1),
        }
    }

    /// Register `pid`. Exported records are inherited from `parent_table`
    /// when given, otherwise from the registered table of `parent_pid`.
    pub fn add(
        &mut self,
        pid: u32,
        parent_pid: Option<u32>,
        parent_table: Option<&ProcessVariableTable>,
    ) -> Result<&mut ProcessVariableTable> {
        if self.tables.contains_key(&pid) {
            return Err(VarsError::DuplicateProcess(pid));
        }
        let parent = parent_table.or_else(|| parent_pid.and_then(|p| self.tables.get(&p)));
        let table = ProcessVariableTable::create(pid, parent_pid, parent);
        tracing::info!(pid, parent = ?parent_pid, inherited = table.len(), "registered process");
        Ok(self.tables.entry(pid).or_insert(table))
    }

    /// Register `pid` with its OS parent, inheriting from that parent's
    /// table if it is registered.
    pub fn register(&mut self, pid: u32) -> Result<&mut ProcessVariableTable> {
        let parent = self.probe.parent_of(pid);
        self.add(pid, parent, None)
    }

    /// Remove and return the table of `pid`.
    pub fn delete(&mut self, pid: u32) -> Result<ProcessVariableTable> {
        let table = self.tables.remove(&pid).ok_or(VarsError::NoSuchProcess(pid))?;
        tracing::info!(pid, variables = table.len(), "removed process table");
        Ok(table)
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessVariableTable> {
        self.tables.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut ProcessVariableTable> {
        self.tables.get_mut(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.tables.contains_key(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.tables.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// First record named `name` found walking from `pid` up through
    /// parent links. The walk ends at a missing parent; revisiting a pid
    /// or going past the depth cap fails.
    pub fn get_inherited(&self, pid: u32, name: &str) -> Result<Option<&VariableRecord>> {
        if !self.tables.contains_key(&pid) {
            return Err(VarsError::NoSuchProcess(pid));
        }
        let mut seen = HashSet::new();
        let mut current = Some(pid);
        let mut depth = 0;
        while let Some(p) = current.filter(|&p| p != 0) {
            let Some(table) = self.tables.get(&p) else {
                break;
            };
            if !seen.insert(p) || depth >= self.max_depth {
                tracing::warn!(start = pid, at = p, depth, "inheritance walk aborted");
                return Err(VarsError::InheritanceCycleSuspected { start: pid, depth });
            }
            if let Some(rec) = table.get(name) {
                return Ok(Some(rec));
            }
            current = table.parent_pid();
            depth += 1;
        }
        Ok(None)
    }

    /// Probe every registered pid and drop the tables of dead processes.
    /// Ambiguous probes keep their table and are reported separately.
    pub fn clear_defunct(&mut self) -> DefunctReport {
        let verdicts = probe_all(self.probe.as_ref(), &self.pids());
        self.apply_verdicts(verdicts)
    }

    /// The probe, for callers that want to run probes outside a lock.
    pub fn probe(&self) -> Arc<dyn ProcessProbe> {
        Arc::clone(&self.probe)
    }

    /// Second half of [`clear_defunct`](Self::clear_defunct) for split-phase
    /// reaping. Pids registered after probing are untouched.
    pub fn apply_verdicts(&mut self, verdicts: Vec<(u32, Liveness)>) -> DefunctReport {
        let mut report = DefunctReport::default();
        for (pid, verdict) in verdicts {
            match verdict {
                Liveness::Alive => {}
                Liveness::Dead => {
                    if self.tables.remove(&pid).is_some() {
                        report.removed.push(pid);
                    }
                }
                Liveness::Unknown(reason) => {
                    tracing::warn!(pid, %reason, "liveness probe inconclusive, keeping table");
                    report.ambiguous.push((pid, reason));
                }
            }
        }
        if !report.removed.is_empty() {
            tracing::info!(removed = ?report.removed, "cleared defunct processes");
        }
        report
    }
}

/// Probe `pids` in parallel; probes are system calls and may be slow.
pub fn probe_all(probe: &dyn ProcessProbe, pids: &[u32]) -> Vec<(u32, Liveness)> {
    pids.par_iter().map(|&pid| (pid, probe.liveness(pid))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::types::VarType;
    use crate::vars::value::Value;
    use std::sync::Mutex;

    /// Probe answering from a mutable set of live pids.
    struct FakeProbe {
        alive: Mutex<HashSet<u32>>,
        unknown: HashSet<u32>,
    }

    impl ProcessProbe for FakeProbe {
        fn liveness(&self, pid: u32) -> Liveness {
            if self.unknown.contains(&pid) {
                return Liveness::Unknown("EIO".into());
            }
            if self.alive.lock().unwrap().contains(&pid) {
                Liveness::Alive
            } else {
                Liveness::Dead
            }
        }
    }

    fn registry_with(alive: &[u32], unknown: &[u32]) -> VariableRegistry {
        let probe = FakeProbe {
            alive: Mutex::new(alive.iter().copied().collect()),
            unknown: unknown.iter().copied().collect(),
        };
        VariableRegistry::new(Arc::new(probe), DEFAULT_MAX_INHERITANCE_DEPTH)
    }

    fn text(s: &str) -> Option<Value> {
        Some(Value::Text(s.into()))
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = registry_with(&[], &[]);
        reg.add(1, None, None).unwrap();
        assert!(matches!(reg.add(1, None, None), Err(VarsError::DuplicateProcess(1))));
    }

    #[test]
    fn add_inherits_from_registered_parent() {
        let mut reg = registry_with(&[], &[]);
        let parent = reg.add(1, None, None).unwrap();
        parent.set("HOME", VarType::String.into(), text("/home/a")).unwrap();
        parent.get_mut("HOME").unwrap().export = true;
        parent.set("LOCAL", VarType::String.into(), text("x")).unwrap();

        let child = reg.add(2, Some(1), None).unwrap();
        assert!(child.get("HOME").unwrap().imported);
        assert!(!child.has("LOCAL"));
    }

    struct ParentProbe;

    impl ProcessProbe for ParentProbe {
        fn liveness(&self, _pid: u32) -> Liveness {
            Liveness::Alive
        }

        fn parent_of(&self, pid: u32) -> Option<u32> {
            pid.checked_sub(1).filter(|&p| p != 0)
        }
    }

    #[test]
    fn register_links_the_os_parent() {
        let mut reg = VariableRegistry::new(Arc::new(ParentProbe), DEFAULT_MAX_INHERITANCE_DEPTH);
        let shell = reg.register(40).unwrap();
        assert_eq!(shell.parent_pid(), Some(39));
        shell.set("LANG", VarType::String.into(), text("C")).unwrap();
        shell.get_mut("LANG").unwrap().export = true;

        let child = reg.register(41).unwrap();
        assert_eq!(child.parent_pid(), Some(40));
        assert!(child.get("LANG").unwrap().imported);
    }

    #[test]
    fn delete_unknown_pid_fails() {
        let mut reg = registry_with(&[], &[]);
        assert!(matches!(reg.delete(3), Err(VarsError::NoSuchProcess(3))));
        reg.add(3, None, None).unwrap();
        assert_eq!(reg.delete(3).unwrap().pid(), 3);
        assert!(reg.is_empty());
    }

    #[test]
    fn inherited_lookup_walks_up_the_chain() {
        let mut reg = registry_with(&[], &[]);
        reg.add(1, None, None).unwrap();
        reg.add(2, Some(1), None).unwrap();
        reg.add(3, Some(2), None).unwrap();
        reg.get_mut(1)
            .unwrap()
            .set("EDITOR", VarType::String.into(), text("vi"))
            .unwrap();

        let found = reg.get_inherited(3, "EDITOR").unwrap().expect("found in pid 1");
        assert_eq!(found.pid, 1);
        assert!(reg.get_inherited(3, "MISSING").unwrap().is_none());
        assert!(matches!(reg.get_inherited(99, "EDITOR"), Err(VarsError::NoSuchProcess(99))));
    }

    #[test]
    fn self_parented_table_is_reported_not_looped() {
        let mut reg = registry_with(&[], &[]);
        reg.add(1, Some(1), None).unwrap();
        let err = reg.get_inherited(1, "X").unwrap_err();
        assert!(matches!(err, VarsError::InheritanceCycleSuspected { start: 1, .. }));
    }

    #[test]
    fn depth_cap_stops_long_chains() {
        let mut reg = VariableRegistry::new(Arc::new(SignalProbe), 2);
        reg.add(1, None, None).unwrap();
        reg.add(2, Some(1), None).unwrap();
        reg.add(3, Some(2), None).unwrap();
        assert!(matches!(
            reg.get_inherited(3, "X"),
            Err(VarsError::InheritanceCycleSuspected { depth: 2, .. })
        ));
    }

    #[test]
    fn clear_defunct_removes_dead_once() {
        let mut reg = registry_with(&[10], &[]);
        reg.add(10, None, None).unwrap();
        reg.add(11, None, None).unwrap();
        reg.add(12, None, None).unwrap();

        let first = reg.clear_defunct();
        assert_eq!(first.removed, vec![11, 12]);
        assert_eq!(first.removed_count(), 2);
        let second = reg.clear_defunct();
        assert_eq!(second.removed_count(), 0);
        assert_eq!(reg.pids(), vec![10]);
    }

    #[test]
    fn ambiguous_probe_keeps_table() {
        let mut reg = registry_with(&[], &[20]);
        reg.add(20, None, None).unwrap();
        let report = reg.clear_defunct();
        assert_eq!(report.removed_count(), 0);
        assert_eq!(report.ambiguous, vec![(20, "EIO".to_string())]);
        assert!(reg.contains(20));
    }
}
