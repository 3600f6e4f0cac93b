use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use crate::errors::{PersistenceError, Result, VarsError};
use crate::vars::persist::LineCodec;
use crate::vars::record::{TraceEvent, VariableRecord};
use crate::vars::types::TypeSpec;
use crate::vars::value::Value;

/// Default mode for a process directory.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// The variables of one process.
#[derive(Debug, Clone)]
pub struct ProcessVariableTable {
    pid: u32,
    parent_pid: Option<u32>,
    records: BTreeMap<String, VariableRecord>,
    pub created: SystemTime,
    pub mode: u32,
}

impl ProcessVariableTable {
    pub fn new(pid: u32, parent_pid: Option<u32>) -> Self {
        ProcessVariableTable {
            pid,
            parent_pid,
            records: BTreeMap::new(),
            created: SystemTime::now(),
            mode: DEFAULT_DIR_MODE,
        }
    }

    /// New table holding a copy of every exported record of `parent`.
    /// Copies are marked imported and start untraced.
    pub fn create(pid: u32, parent_pid: Option<u32>, parent: Option<&ProcessVariableTable>) -> Self {
        let mut table = ProcessVariableTable::new(pid, parent_pid);
        if let Some(parent) = parent {
            for (name, rec) in parent.records.iter().filter(|(_, r)| r.export) {
                table.records.insert(name.clone(), rec.inherited_copy(pid));
            }
            tracing::debug!(
                pid,
                parent = parent.pid,
                inherited = table.records.len(),
                "inherited exported variables"
            );
        }
        table
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn parent_pid(&self) -> Option<u32> {
        self.parent_pid
    }

    /// Create or overwrite `name`. An existing read-only record is left
    /// alone and the call fails.
    pub fn set(&mut self, name: &str, spec: TypeSpec, value: Option<Value>) -> Result<Option<TraceEvent>> {
        if let Some(rec) = self.records.get_mut(name) {
            return rec.retype(spec, value);
        }
        let mut rec = VariableRecord::new(name, self.pid, spec);
        let event = rec.retype(spec, value)?;
        self.records.insert(name.to_string(), rec);
        Ok(event)
    }

    /// Insert a fully built record, replacing any previous one of that name.
    pub fn insert(&mut self, mut rec: VariableRecord) -> Result<()> {
        if self.records.get(&rec.name).is_some_and(|old| old.read_only) {
            return Err(VarsError::ReadOnlyViolation(rec.name));
        }
        rec.pid = self.pid;
        self.records.insert(rec.name.clone(), rec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&VariableRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VariableRecord> {
        self.records.get_mut(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<VariableRecord> {
        self.records.remove(name)
    }

    /// Move `old` to `new`, replacing a writable record already at `new`.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if !self.records.contains_key(old) {
            return Err(VarsError::NotFound(format!("/{}/{}", self.pid, old)));
        }
        if old == new {
            return Ok(());
        }
        if self.records.get(new).is_some_and(|r| r.read_only) {
            return Err(VarsError::ReadOnlyViolation(new.to_string()));
        }
        if let Some(mut rec) = self.records.remove(old) {
            rec.name = new.to_string();
            self.records.insert(new.to_string(), rec);
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &VariableRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write every record as `name<D>type<D>value`, one per line.
    pub fn save(&self, path: &Path, codec: &LineCodec) -> Result<()> {
        let io_err = |source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = fs::File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        for rec in self.records.values() {
            let content = String::from_utf8_lossy(rec.content());
            let spec = rec.spec().to_string();
            let line = codec.encode(&[rec.name.as_str(), spec.as_str(), &*content]);
            writeln!(out, "{}", line).map_err(io_err)?;
        }
        out.flush().map_err(io_err)?;
        tracing::debug!(pid = self.pid, path = %path.display(), count = self.records.len(), "saved table");
        Ok(())
    }

    /// Read records written by [`save`](Self::save) into this table,
    /// overwriting records of the same name. Blank lines are skipped. Only
    /// `\n` ends a line, so a carriage return inside a value survives.
    pub fn load(&mut self, path: &Path, codec: &LineCodec) -> Result<usize> {
        let text = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let malformed = |line: usize, reason: String| PersistenceError::Malformed {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut loaded = 0;
        for (idx, line) in text.split('\n').enumerate() {
            let lineno = idx + 1;
            if line.is_empty() {
                continue;
            }
            let fields = codec.decode(line).map_err(|r| malformed(lineno, r))?;
            let [name, spec, content] = fields.as_slice() else {
                return Err(malformed(lineno, format!("expected 3 fields, found {}", fields.len())).into());
            };
            if name.is_empty() {
                return Err(malformed(lineno, "empty variable name".to_string()).into());
            }
            let spec: TypeSpec = spec.parse().map_err(|e: VarsError| malformed(lineno, e.to_string()))?;

            let mut rec = VariableRecord::new(name.as_str(), self.pid, spec);
            rec.write_content(content.clone().into_bytes())
                .map_err(|e| malformed(lineno, e.to_string()))?;
            self.insert(rec)?;
            loaded += 1;
        }
        tracing::debug!(pid = self.pid, path = %path.display(), loaded, "loaded table");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::types::VarType;
    use tempfile::tempdir;

    fn s(text: &str) -> Option<Value> {
        Some(Value::Text(text.to_string()))
    }

    #[test]
    fn create_copies_only_exported_records() {
        let mut parent = ProcessVariableTable::new(1, None);
        parent.set("A", VarType::String.into(), s("a")).unwrap();
        parent.set("B", VarType::String.into(), s("b")).unwrap();
        let a = parent.get_mut("A").unwrap();
        a.export = true;
        a.trace_level = 2;

        let child = ProcessVariableTable::create(2, Some(1), Some(&parent));
        let a = child.get("A").expect("exported A inherited");
        assert!(a.imported);
        assert_eq!(a.trace_level, 0);
        assert_eq!(a.pid, 2);
        assert!(!child.has("B"));
    }

    #[test]
    fn set_overwrites_unless_read_only() {
        let mut t = ProcessVariableTable::new(5, None);
        t.set("X", VarType::Int.into(), Some(Value::Int(1))).unwrap();
        t.set("X", VarType::String.into(), s("one")).unwrap();
        assert_eq!(t.get("X").unwrap().var_type(), VarType::String);

        t.get_mut("X").unwrap().read_only = true;
        let err = t.set("X", VarType::String.into(), s("two")).unwrap_err();
        assert!(matches!(err, VarsError::ReadOnlyViolation(_)));
        assert_eq!(t.get("X").unwrap().peek(), Some(&Value::Text("one".into())));
    }

    #[test]
    fn get_absent_is_none() {
        let t = ProcessVariableTable::new(5, None);
        assert!(t.get("NOPE").is_none());
        assert!(!t.has("NOPE"));
    }

    #[test]
    fn rename_moves_record() {
        let mut t = ProcessVariableTable::new(5, None);
        t.set("OLD", VarType::String.into(), s("v")).unwrap();
        t.rename("OLD", "NEW").unwrap();
        assert!(!t.has("OLD"));
        assert_eq!(t.get("NEW").unwrap().name, "NEW");
        assert!(matches!(t.rename("OLD", "X"), Err(VarsError::NotFound(_))));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vars.txt");
        let codec = LineCodec::default();

        let mut t = ProcessVariableTable::new(9, None);
        t.set("PATH", VarType::String.into(), s("/bin,/usr/bin")).unwrap();
        t.set("MULTI", VarType::String.into(), s("line one\nline\\two")).unwrap();
        t.set("ODD,NAME", VarType::Token.into(), s("x")).unwrap();
        t.set("NUMS", "list<int>".parse().unwrap(), Some(Value::List(vec![Value::Int(1), Value::Int(2)])))
            .unwrap();
        t.set("EMPTY", VarType::String.into(), None).unwrap();
        t.set("DOS", VarType::String.into(), s("dos\r")).unwrap();
        t.set("CRLF", VarType::String.into(), s("a\r\nb\r")).unwrap();
        t.save(&path, &codec).unwrap();

        let mut fresh = ProcessVariableTable::new(9, None);
        assert_eq!(fresh.load(&path, &codec).unwrap(), 7);
        for rec in t.records() {
            let got = fresh.get(&rec.name).expect("record reloaded");
            assert_eq!(got.spec(), rec.spec());
            assert_eq!(got.peek(), rec.peek());
            assert_eq!(got.content(), rec.content());
        }
    }

    #[test]
    fn load_reports_malformed_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        fs::write(&path, "A,string,ok\nB,string\n").unwrap();
        let mut t = ProcessVariableTable::new(1, None);
        let err = t.load(&path, &LineCodec::default()).unwrap_err();
        match err {
            VarsError::Persistence(PersistenceError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_missing_file_is_persistence_error() {
        let dir = tempdir().unwrap();
        let mut t = ProcessVariableTable::new(1, None);
        let err = t.load(&dir.path().join("absent"), &LineCodec::default()).unwrap_err();
        assert!(matches!(err, VarsError::Persistence(PersistenceError::Io { .. })));
    }
}
