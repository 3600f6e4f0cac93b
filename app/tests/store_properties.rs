use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use tempfile::tempdir;

use fusevars::vars::persist::LineCodec;
use fusevars::vars::registry::DEFAULT_MAX_INHERITANCE_DEPTH;
use fusevars::vars::{Liveness, ProcessProbe, ProcessVariableTable, TypeSpec, Value, VarType, VariableRegistry};
use fusevars::{PersistenceError, VarsError};

struct AllDead;

impl ProcessProbe for AllDead {
    fn liveness(&self, _pid: u32) -> Liveness {
        Liveness::Dead
    }
}

fn registry() -> VariableRegistry {
    VariableRegistry::new(Arc::new(AllDead), DEFAULT_MAX_INHERITANCE_DEPTH)
}

fn text(s: &str) -> Option<Value> {
    Some(Value::Text(s.to_string()))
}

// Walk 3 -> 2 -> 1: found at the top, absent everywhere gives None.
#[test]
fn inherited_lookup_chain() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = registry();
    reg.add(1, None, None)?;
    reg.add(2, Some(1), None)?;
    reg.add(3, Some(2), None)?;
    reg.get_mut(1)
        .ok_or("pid 1")?
        .set("SHELL", VarType::String.into(), text("/bin/sh"))?;
    reg.get_mut(2)
        .ok_or("pid 2")?
        .set("SHELL", VarType::String.into(), text("/bin/zsh"))?;

    let nearest = reg.get_inherited(3, "SHELL")?.ok_or("SHELL visible from 3")?;
    assert_eq!(nearest.pid, 2);
    assert!(reg.get_inherited(3, "PAGER")?.is_none());
    Ok(())
}

#[test]
fn two_process_loop_is_detected() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = registry();
    reg.add(10, Some(11), None)?;
    reg.add(11, Some(10), None)?;
    let err = reg.get_inherited(10, "X").unwrap_err();
    assert!(matches!(err, VarsError::InheritanceCycleSuspected { start: 10, .. }));
    Ok(())
}

#[test]
fn read_only_set_keeps_previous_value() -> Result<(), Box<dyn std::error::Error>> {
    let mut table = ProcessVariableTable::new(1, None);
    table.set("UID", VarType::Int.into(), Some(Value::Int(1000)))?;
    table.get_mut("UID").ok_or("UID")?.read_only = true;
    let err = table.set("UID", VarType::Int.into(), Some(Value::Int(0))).unwrap_err();
    assert!(matches!(err, VarsError::ReadOnlyViolation(ref n) if n == "UID"));
    assert_eq!(table.get("UID").ok_or("UID")?.peek(), Some(&Value::Int(1000)));
    Ok(())
}

#[test]
fn clear_defunct_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = registry();
    for pid in [21, 22, 23] {
        reg.add(pid, None, None)?;
    }
    assert_eq!(reg.clear_defunct().removed_count(), 3);
    assert_eq!(reg.clear_defunct().removed_count(), 0);
    assert!(reg.is_empty());
    Ok(())
}

#[test]
fn save_load_with_custom_delimiter() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let path = tmp.path().join("table.vars");
    let codec = LineCodec::new('|')?;

    let mut table = ProcessVariableTable::new(8, None);
    table.set("PIPE|NAME", VarType::String.into(), text("a|b\\c\nd,e"))?;
    table.set("WHEN", VarType::Date.into(), Some(Value::parse("2024-02-29", &VarType::Date.into())?))?;
    let dict: TypeSpec = "dict<token:int>".parse()?;
    table.set("SIZES", dict, Some(Value::parse("small=1\nlarge=9", &dict)?))?;
    table.save(&path, &codec)?;

    let mut loaded = ProcessVariableTable::new(8, None);
    assert_eq!(loaded.load(&path, &codec)?, 3);
    for rec in table.records() {
        let back = loaded.get(&rec.name).ok_or("record missing after load")?;
        assert_eq!(back.peek(), rec.peek(), "{}", rec.name);
        assert_eq!(back.spec(), rec.spec());
    }

    // Every record is one physical line.
    assert_eq!(fs::read_to_string(&path)?.lines().count(), 3);
    Ok(())
}

#[test]
fn malformed_file_names_the_line() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let path = tmp.path().join("bad.vars");
    fs::write(&path, "A,string,fine\n\nB,nosuchtype,x\n")?;
    let mut table = ProcessVariableTable::new(1, None);
    match table.load(&path, &LineCodec::default()) {
        Err(VarsError::Persistence(PersistenceError::Malformed { line, path: p, .. })) => {
            assert_eq!(line, 3);
            assert_eq!(p, path);
        }
        other => panic!("expected a malformed-line error, got {:?}", other),
    }
    Ok(())
}

// Collections are saved one element per line; anything that form cannot
// carry is refused up front instead of coming back changed.
#[test]
fn collections_survive_save_and_load_or_are_refused() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let path = tmp.path().join("lists.vars");
    let codec = LineCodec::default();
    let list: TypeSpec = "list<string>".parse()?;
    let dict: TypeSpec = "dict<string:int>".parse()?;

    let mut table = ProcessVariableTable::new(4, None);
    let split = Value::List(vec![Value::Text("a\nb".into()), Value::Text(String::new())]);
    assert!(matches!(
        table.set("BAD", list, Some(split)),
        Err(VarsError::TypeMismatch { .. })
    ));
    let eq_key = Value::Dict(BTreeMap::from([("a=b".to_string(), Value::Int(1))]));
    assert!(matches!(
        table.set("BADMAP", dict, Some(eq_key)),
        Err(VarsError::TypeMismatch { .. })
    ));
    assert!(table.is_empty());

    let dirs = Value::List(vec![Value::Text("/usr/local/bin".into()), Value::Text("with, comma".into())]);
    table.set("DIRS", list, Some(dirs.clone()))?;
    let sizes = Value::Dict(BTreeMap::from([("k b".to_string(), Value::Int(-3))]));
    table.set("SIZES", dict, Some(sizes.clone()))?;
    table.save(&path, &codec)?;

    let mut loaded = ProcessVariableTable::new(4, None);
    assert_eq!(loaded.load(&path, &codec)?, 2);
    assert_eq!(loaded.get("DIRS").ok_or("DIRS")?.peek(), Some(&dirs));
    assert_eq!(loaded.get("SIZES").ok_or("SIZES")?.peek(), Some(&sizes));
    Ok(())
}

