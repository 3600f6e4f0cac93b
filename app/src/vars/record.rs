use std::cell::OnceCell;
use std::fmt;
use std::time::SystemTime;

use crate::errors::{Result, VarsError};
use crate::vars::format;
use crate::vars::types::{TypeSpec, VarType};
use crate::vars::value::Value;

/// Default permission bits for a new record (`rw-r--r--`).
pub const DEFAULT_PERMISSIONS: u32 = 0o644;

/// One change to a traced record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub pid: u32,
    pub name: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SET {}/{}: {:?} -> {:?}",
            self.pid,
            self.name,
            self.old.as_deref().unwrap_or(""),
            self.new.as_deref().unwrap_or("")
        )
    }
}

/// A single named, typed variable owned by one process.
///
/// The record keeps two views of its value: the byte content the
/// filesystem side reads and writes, and the typed [`Value`]. Typed
/// records parse every content change up front and refuse bytes that do
/// not fit. Free-text records (`string`, `any`) take any bytes and decode
/// the value on first use, so a multibyte character split across two
/// writes is fine. Every mutation enforces the read-only flag.
#[derive(Debug, Clone)]
pub struct VariableRecord {
    pub name: String,
    pub pid: u32,
    spec: TypeSpec,
    value: OnceCell<Option<Value>>,
    content: Vec<u8>,
    pub read_only: bool,
    /// Copied into child tables at registration.
    pub export: bool,
    /// Set on copies received from a parent table.
    pub imported: bool,
    pub permissions: u32,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    /// printf-style display hint, e.g. `%08.3f`.
    pub format: Option<String>,
    pub trace_level: u8,
}

impl VariableRecord {
    pub fn new(name: impl Into<String>, pid: u32, spec: TypeSpec) -> Self {
        let now = SystemTime::now();
        VariableRecord {
            name: name.into(),
            pid,
            spec,
            value: OnceCell::from(None),
            content: Vec::new(),
            read_only: false,
            export: false,
            imported: false,
            permissions: DEFAULT_PERMISSIONS,
            uid: 0,
            gid: 0,
            created: now,
            modified: now,
            accessed: now,
            format: None,
            trace_level: 0,
        }
    }

    pub fn with_value(name: impl Into<String>, pid: u32, spec: TypeSpec, value: Value) -> Result<Self> {
        spec.validate()?;
        let mut rec = VariableRecord::new(name, pid, spec);
        rec.set(value)?;
        Ok(rec)
    }

    pub fn spec(&self) -> &TypeSpec {
        &self.spec
    }

    pub fn var_type(&self) -> VarType {
        self.spec.tag
    }

    /// Replace the value after checking the read-only flag and the
    /// declared type. Returns the trace event when the record is traced.
    pub fn set(&mut self, value: Value) -> Result<Option<TraceEvent>> {
        self.ensure_writable()?;
        value
            .check(&self.spec)
            .map_err(|detail| VarsError::type_mismatch(&self.name, self.spec, detail))?;
        let content = content_for(&value);
        Ok(self.commit(Some(value), content))
    }

    /// Drop the value, leaving an empty record.
    pub fn clear(&mut self) -> Result<Option<TraceEvent>> {
        self.ensure_writable()?;
        Ok(self.commit(None, Vec::new()))
    }

    /// Current value; refreshes the access time.
    pub fn get(&mut self) -> Option<&Value> {
        self.touch();
        self.peek()
    }

    /// Current value without touching the access time.
    pub fn peek(&self) -> Option<&Value> {
        self.value
            .get_or_init(|| decode(&self.content, &self.spec))
            .as_ref()
    }

    /// True if the declared tag is one of `candidates`, or falls inside the
    /// band of a candidate that heads one (`Numeric` matches `Int`).
    pub fn matches_type(&self, candidates: &[VarType]) -> bool {
        candidates.iter().any(|&c| self.spec.tag.within(c))
    }

    /// Change the declared type and value together.
    pub fn retype(&mut self, spec: TypeSpec, value: Option<Value>) -> Result<Option<TraceEvent>> {
        self.ensure_writable()?;
        spec.validate()?;
        if let Some(v) = &value {
            v.check(&spec)
                .map_err(|detail| VarsError::type_mismatch(&self.name, spec, detail))?;
        }
        let old = self.traced_text();
        self.spec = spec;
        self.content = value.as_ref().map(content_for).unwrap_or_default();
        self.value = OnceCell::from(value);
        Ok(self.finish(old, true))
    }

    /// Change the declared type and re-read the current content under it.
    /// Nothing changes when the content does not parse; a trace event is
    /// only produced when the rendered value differs.
    pub fn reinterpret(&mut self, spec: TypeSpec) -> Result<Option<TraceEvent>> {
        self.ensure_writable()?;
        spec.validate()?;
        let value = self.parse_content(&self.content, &spec)?;
        let old = self.traced_text();
        self.spec = spec;
        self.value = value.map_or_else(OnceCell::new, OnceCell::from);
        Ok(self.finish(old, false))
    }

    /// Serialized value as seen through the filesystem.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the content from the filesystem side. The bytes are kept
    /// verbatim. Typed records parse them (one trailing newline ignored,
    /// zero-length content clears the value) and are left untouched when
    /// that fails.
    pub fn write_content(&mut self, bytes: Vec<u8>) -> Result<Option<TraceEvent>> {
        self.ensure_writable()?;
        let value = self.parse_content(&bytes, &self.spec)?;
        let old = self.traced_text();
        self.content = bytes;
        self.value = value.map_or_else(OnceCell::new, OnceCell::from);
        Ok(self.finish(old, true))
    }

    /// Copy `data` into the content at `offset`, zero-filling any gap.
    pub fn splice(&mut self, offset: usize, data: &[u8]) -> Result<Option<TraceEvent>> {
        let end = offset
            .checked_add(data.len())
            .ok_or_else(|| self.too_large(u64::MAX))?;
        self.edit_content(end, |buf| {
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[offset..end].copy_from_slice(data);
        })
    }

    /// Cut or zero-extend the content to `len` bytes.
    pub fn resize(&mut self, len: usize) -> Result<Option<TraceEvent>> {
        self.edit_content(len, |buf| buf.resize(len, 0))
    }

    /// Value rendered through the display hint, or plainly when there is
    /// no hint or it does not apply to the value.
    pub fn formatted(&self) -> String {
        let Some(value) = self.peek() else {
            return String::new();
        };
        self.format
            .as_deref()
            .and_then(|hint| format::apply(hint, value))
            .unwrap_or_else(|| value.render())
    }

    pub fn touch(&mut self) {
        self.accessed = SystemTime::now();
    }

    /// Copy handed to a child table: marked imported, tracing off.
    pub fn inherited_copy(&self, pid: u32) -> Self {
        let mut copy = self.clone();
        copy.pid = pid;
        copy.imported = true;
        copy.trace_level = 0;
        copy
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(VarsError::ReadOnlyViolation(self.name.clone()));
        }
        Ok(())
    }

    fn too_large(&self, size: u64) -> VarsError {
        VarsError::TooLarge {
            name: self.name.clone(),
            size,
            limit: isize::MAX as u64,
        }
    }

    /// `Ok(None)` for free-text types, whose value is decoded lazily.
    fn parse_content(&self, bytes: &[u8], spec: &TypeSpec) -> Result<Option<Option<Value>>> {
        if spec.is_free_text() {
            return Ok(None);
        }
        if bytes.is_empty() {
            return Ok(Some(None));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| VarsError::type_mismatch(&self.name, spec, format!("content is not UTF-8: {}", e)))?;
        let body = text.strip_suffix('\n').unwrap_or(text);
        let value = Value::parse(body, spec).map_err(|detail| VarsError::type_mismatch(&self.name, spec, detail))?;
        Ok(Some(Some(value)))
    }

    // Free-text records are edited in place; typed ones on a copy so a
    // failed parse leaves them as they were.
    fn edit_content(&mut self, len: usize, edit: impl FnOnce(&mut Vec<u8>)) -> Result<Option<TraceEvent>> {
        self.ensure_writable()?;
        let grow = len.saturating_sub(self.content.len());
        if !self.spec.is_free_text() {
            let mut bytes = Vec::new();
            bytes
                .try_reserve_exact(self.content.len() + grow)
                .map_err(|_| self.too_large(len as u64))?;
            bytes.extend_from_slice(&self.content);
            edit(&mut bytes);
            return self.write_content(bytes);
        }
        self.content
            .try_reserve(grow)
            .map_err(|_| self.too_large(len as u64))?;
        let old = self.traced_text();
        edit(&mut self.content);
        self.value = OnceCell::new();
        Ok(self.finish(old, true))
    }

    fn commit(&mut self, value: Option<Value>, content: Vec<u8>) -> Option<TraceEvent> {
        let old = self.traced_text();
        self.content = content;
        self.value = OnceCell::from(value);
        self.finish(old, true)
    }

    /// Rendered current value, captured only when the record is traced.
    fn traced_text(&self) -> Option<Option<String>> {
        (self.trace_level > 0).then(|| self.peek().map(Value::render))
    }

    fn finish(&mut self, old: Option<Option<String>>, always: bool) -> Option<TraceEvent> {
        self.modified = SystemTime::now();
        let old = old?;
        let new = self.peek().map(Value::render);
        if !always && old == new {
            return None;
        }
        let event = TraceEvent {
            pid: self.pid,
            name: self.name.clone(),
            old,
            new,
        };
        tracing::info!(
            target: "fusevars::trace",
            pid = event.pid,
            name = %event.name,
            var_type = %self.spec,
            old = event.old.as_deref().unwrap_or(""),
            new = event.new.as_deref().unwrap_or(""),
            "variable changed"
        );
        Some(event)
    }
}

// Value of `content` when nothing has been cached: free text is decoded
// leniently, typed content that no longer parses reads as empty.
fn decode(content: &[u8], spec: &TypeSpec) -> Option<Value> {
    if content.is_empty() {
        return None;
    }
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    let text = String::from_utf8_lossy(body);
    if spec.is_free_text() {
        return Some(Value::Text(text.into_owned()));
    }
    Value::parse(&text, spec).ok()
}

// Content that `write_content` parses back to exactly `value`: text that
// is empty or already ends in a newline gets one more.
fn content_for(value: &Value) -> Vec<u8> {
    let mut text = value.render();
    if text.is_empty() || text.ends_with('\n') {
        text.push('\n');
    }
    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_var(n: i64) -> VariableRecord {
        VariableRecord::with_value("COUNT", 10, VarType::Int.into(), Value::Int(n)).unwrap()
    }

    #[test]
    fn set_checks_type_and_updates_content() {
        let mut rec = int_var(1);
        rec.set(Value::Int(7)).unwrap();
        assert_eq!(rec.content(), b"7");
        let err = rec.set(Value::Text("seven".into())).unwrap_err();
        assert!(matches!(err, VarsError::TypeMismatch { .. }));
        assert_eq!(rec.peek(), Some(&Value::Int(7)));
    }

    #[test]
    fn read_only_blocks_every_mutation() {
        let mut rec = int_var(1);
        rec.read_only = true;
        assert!(matches!(rec.set(Value::Int(2)), Err(VarsError::ReadOnlyViolation(_))));
        assert!(matches!(rec.clear(), Err(VarsError::ReadOnlyViolation(_))));
        assert!(matches!(
            rec.write_content(b"3\n".to_vec()),
            Err(VarsError::ReadOnlyViolation(_))
        ));
        assert_eq!(rec.peek(), Some(&Value::Int(1)));
    }

    #[test]
    fn traced_records_report_old_and_new() {
        let mut rec = int_var(1);
        assert_eq!(rec.set(Value::Int(2)).unwrap(), None);
        rec.trace_level = 1;
        let ev = rec.set(Value::Int(3)).unwrap().expect("trace event");
        assert_eq!(ev.old.as_deref(), Some("2"));
        assert_eq!(ev.new.as_deref(), Some("3"));
        assert_eq!(ev.to_string(), "SET 10/COUNT: \"2\" -> \"3\"");
    }

    #[test]
    fn write_content_keeps_bytes_and_parses_value() {
        let mut rec = int_var(0);
        rec.write_content(b"42\n".to_vec()).unwrap();
        assert_eq!(rec.content(), b"42\n");
        assert_eq!(rec.peek(), Some(&Value::Int(42)));

        assert!(rec.write_content(b"4 2".to_vec()).is_err());
        assert_eq!(rec.content(), b"42\n");

        rec.write_content(Vec::new()).unwrap();
        assert_eq!(rec.peek(), None);
    }

    #[test]
    fn content_round_trips_trailing_newlines() {
        let mut rec = VariableRecord::new("S", 1, TypeSpec::default());
        for text in ["", "abc\n", "plain"] {
            rec.set(Value::Text(text.into())).unwrap();
            let bytes = rec.content().to_vec();
            let mut other = VariableRecord::new("S", 1, TypeSpec::default());
            other.write_content(bytes).unwrap();
            assert_eq!(other.peek(), Some(&Value::Text(text.into())));
        }
    }

    #[test]
    fn matches_type_uses_bands() {
        let rec = int_var(0);
        assert!(rec.matches_type(&[VarType::Numeric]));
        assert!(rec.matches_type(&[VarType::String, VarType::Int]));
        assert!(!rec.matches_type(&[VarType::Float, VarType::Epoch]));
    }

    #[test]
    fn inherited_copy_is_marked_and_untraced() {
        let mut rec = int_var(5);
        rec.export = true;
        rec.trace_level = 3;
        let copy = rec.inherited_copy(11);
        assert_eq!(copy.pid, 11);
        assert!(copy.imported);
        assert_eq!(copy.trace_level, 0);
        assert_eq!(copy.peek(), Some(&Value::Int(5)));
    }

    #[test]
    fn formatted_applies_hint() {
        let mut rec = VariableRecord::with_value("PI", 1, VarType::Float.into(), Value::Float(3.14159)).unwrap();
        assert_eq!(rec.formatted(), "3.14159");
        rec.format = Some("%.2f".into());
        assert_eq!(rec.formatted(), "3.14");
        rec.format = Some("%d".into());
        assert_eq!(rec.formatted(), "3.14159");
    }

    #[test]
    fn split_multibyte_write_is_accepted() {
        let mut rec = VariableRecord::new("S", 7, TypeSpec::default());
        rec.splice(0, b"caf\xc3").unwrap();
        rec.splice(4, b"\xa9\n").unwrap();
        assert_eq!(rec.content(), "café\n".as_bytes());
        assert_eq!(rec.peek(), Some(&Value::Text("café".into())));
    }

    #[test]
    fn free_text_keeps_raw_bytes() {
        let mut rec = VariableRecord::new("L", 7, TypeSpec::default());
        rec.write_content(b"caf\xe9\n".to_vec()).unwrap();
        assert_eq!(rec.content(), b"caf\xe9\n");
        assert_eq!(rec.peek(), Some(&Value::Text("caf\u{fffd}".into())));

        let mut typed = int_var(5);
        assert!(matches!(
            typed.splice(0, b"\xff"),
            Err(VarsError::TypeMismatch { .. })
        ));
        assert_eq!(typed.content(), b"5");
    }

    #[test]
    fn resize_zero_fills_and_cuts() {
        let mut rec = VariableRecord::new("S", 1, TypeSpec::default());
        rec.splice(2, b"XY").unwrap();
        assert_eq!(rec.content(), b"\0\0XY");
        rec.resize(1).unwrap();
        assert_eq!(rec.content(), b"\0");
        rec.resize(0).unwrap();
        assert_eq!(rec.peek(), None);
    }

    #[test]
    fn reinterpret_commits_once() {
        let mut rec = VariableRecord::new("N", 3, TypeSpec::default());
        rec.write_content(b"42\n".to_vec()).unwrap();
        rec.trace_level = 1;

        // Same rendering under the new type: no change to report.
        assert_eq!(rec.reinterpret(VarType::Int.into()).unwrap(), None);
        assert_eq!(rec.peek(), Some(&Value::Int(42)));

        assert!(rec.reinterpret(VarType::Date.into()).is_err());
        assert_eq!(rec.var_type(), VarType::Int);
        assert_eq!(rec.peek(), Some(&Value::Int(42)));

        let ev = rec.reinterpret(VarType::Float.into()).unwrap();
        assert_eq!(ev, None);
        rec.write_content(b"2.5".to_vec()).unwrap();
        let ev = rec.reinterpret(VarType::String.into()).unwrap();
        assert_eq!(ev, None);
        assert_eq!(rec.peek(), Some(&Value::Text("2.5".into())));
    }
}
