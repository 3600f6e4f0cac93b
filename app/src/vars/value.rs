//! Typed variable values and their text form.
//!
//! Text is what the filesystem side sees: `cat` prints [`Value::render`],
//! a write is turned back into a value by [`Value::parse`]. Collections
//! use one element per line (`key=value` for dicts). [`Value::check`]
//! refuses elements that form would lose: empty or multi-line elements,
//! and dict keys containing `=`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::vars::types::{TypeSpec, VarType};

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S%.f";
const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Unsigned(u64),
    Float(f64),
    Complex { re: f64, im: f64 },
    /// Seconds since the Unix epoch.
    Epoch(i64),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Text(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Parse `text` under `spec`. The error is a human-readable reason,
    /// wrapped into `TypeMismatch` by the caller that knows the name.
    pub fn parse(text: &str, spec: &TypeSpec) -> Result<Value, String> {
        if spec.tag.is_collection() {
            return parse_collection(text, spec);
        }
        parse_scalar(text, spec.tag)
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Check that this value fits `spec`.
    pub fn check(&self, spec: &TypeSpec) -> Result<(), String> {
        if spec.tag.is_collection() {
            return self.check_collection(spec);
        }
        self.check_scalar(spec.tag)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Unsigned(_) => "unsigned",
            Value::Float(_) => "float",
            Value::Complex { .. } => "complex",
            Value::Epoch(_) => "epoch",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Text(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }

    fn check_scalar(&self, tag: VarType) -> Result<(), String> {
        let ok = match (tag, self) {
            (VarType::Any, _) => true,
            (VarType::Bool, Value::Bool(_)) => true,
            (
                VarType::Numeric,
                Value::Int(_) | Value::Unsigned(_) | Value::Float(_) | Value::Complex { .. },
            ) => true,
            (VarType::Ordinal | VarType::Unsigned, Value::Unsigned(_)) => true,
            (VarType::Int, Value::Int(_)) => true,
            (VarType::Prob, Value::Float(p)) => {
                if !(0.0..=1.0).contains(p) {
                    return Err(format!("probability {} outside [0, 1]", p));
                }
                true
            }
            (VarType::Float | VarType::Double, Value::Float(_)) => true,
            (VarType::Complex, Value::Complex { .. }) => true,
            (VarType::TensorN, Value::List(items)) => items
                .iter()
                .all(|v| matches!(v, Value::Int(_) | Value::Unsigned(_) | Value::Float(_))),
            (
                VarType::Epoch,
                Value::Epoch(_) | Value::Date(_) | Value::Time(_) | Value::DateTime(_),
            ) => true,
            (VarType::Date, Value::Date(_)) => true,
            (VarType::Time, Value::Time(_)) => true,
            (VarType::DateTime, Value::DateTime(_)) => true,
            (VarType::String, Value::Text(_)) => true,
            (tag, Value::Text(s)) if tag.within(VarType::String) || tag.within(VarType::Enum) => {
                return check_text(s, tag);
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("found {}", self.kind()))
        }
    }

    fn check_collection(&self, spec: &TypeSpec) -> Result<(), String> {
        let elem = spec.elem.unwrap_or(VarType::Any);
        match self {
            Value::Dict(map) if spec.tag == VarType::Dict || spec.tag == VarType::Collection => {
                let key = spec.key.unwrap_or(VarType::Any);
                for (k, v) in map {
                    if k.contains(&['=', '\n'][..]) {
                        return Err(format!("dict key `{}` contains `=` or a newline", k.escape_debug()));
                    }
                    parse_scalar(k, key).map_err(|e| format!("key `{}`: {}", k, e))?;
                    v.check_scalar(elem).map_err(|e| format!("entry `{}`: {}", k, e))?;
                    if v.render().contains('\n') {
                        return Err(format!("entry `{}` spans several lines", k));
                    }
                }
                Ok(())
            }
            Value::List(items) if spec.tag != VarType::Dict => {
                for (i, v) in items.iter().enumerate() {
                    v.check_scalar(elem).map_err(|e| format!("element {}: {}", i, e))?;
                    let text = v.render();
                    if text.is_empty() || text.contains('\n') {
                        return Err(format!("element {} must be one non-empty line", i));
                    }
                }
                if spec.tag == VarType::Set {
                    ensure_unique(items)?;
                }
                Ok(())
            }
            other => Err(format!("found {}", other.kind())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Unsigned(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Complex { re, im } => {
                if im.is_sign_negative() {
                    write!(f, "{}-{}i", re, -im)
                } else {
                    write!(f, "{}+{}i", re, im)
                }
            }
            Value::Epoch(secs) => write!(f, "{}", secs),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FMT)),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FMT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FMT)),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
            Value::Dict(map) => {
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                Ok(())
            }
        }
    }
}

fn parse_scalar(text: &str, tag: VarType) -> Result<Value, String> {
    let t = text.trim();
    let bad = |what: &str| Err(format!("`{}` is not a valid {}", text, what));
    match tag {
        VarType::Any => Ok(Value::Text(text.to_string())),
        VarType::Bool => match t.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => bad("bool"),
        },
        VarType::Numeric => {
            if let Ok(n) = t.parse::<i64>() {
                Ok(Value::Int(n))
            } else if let Ok(x) = t.parse::<f64>() {
                Ok(Value::Float(x))
            } else if let Some((re, im)) = parse_complex(t) {
                Ok(Value::Complex { re, im })
            } else {
                bad("number")
            }
        }
        VarType::Ordinal | VarType::Unsigned => {
            t.parse::<u64>().map(Value::Unsigned).or_else(|_| bad(tag.name()))
        }
        VarType::Int => t.parse::<i64>().map(Value::Int).or_else(|_| bad("int")),
        VarType::Prob | VarType::Float | VarType::Double => {
            let v = t.parse::<f64>().map(Value::Float).or_else(|_| bad(tag.name()))?;
            v.check_scalar(tag)?;
            Ok(v)
        }
        VarType::Complex => match parse_complex(t) {
            Some((re, im)) => Ok(Value::Complex { re, im }),
            None => bad("complex"),
        },
        VarType::TensorN => t
            .split_whitespace()
            .map(|w| w.parse::<f64>().map(Value::Float))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
            .or_else(|_| bad("numeric vector")),
        VarType::Epoch => {
            if let Ok(secs) = t.parse::<i64>() {
                return Ok(Value::Epoch(secs));
            }
            parse_datetime(t)
                .map(Value::DateTime)
                .or_else(|| NaiveDate::parse_from_str(t, DATE_FMT).ok().map(Value::Date))
                .or_else(|| NaiveTime::parse_from_str(t, TIME_FMT).ok().map(Value::Time))
                .map_or_else(|| bad("epoch"), Ok)
        }
        VarType::Date => NaiveDate::parse_from_str(t, DATE_FMT)
            .map(Value::Date)
            .or_else(|_| bad("date")),
        VarType::Time => NaiveTime::parse_from_str(t, TIME_FMT)
            .map(Value::Time)
            .or_else(|_| bad("time")),
        VarType::DateTime => parse_datetime(t).map_or_else(|| bad("datetime"), |dt| Ok(Value::DateTime(dt))),
        tag if tag.within(VarType::String) || tag.within(VarType::Enum) => {
            check_text(text, tag)?;
            Ok(Value::Text(text.to_string()))
        }
        other => bad(other.name()),
    }
}

fn parse_collection(text: &str, spec: &TypeSpec) -> Result<Value, String> {
    let elem = spec.elem.unwrap_or(VarType::Any);
    let lines = || text.split('\n').filter(|l| !l.is_empty());
    if spec.tag == VarType::Dict {
        let key = spec.key.unwrap_or(VarType::Any);
        let mut map = BTreeMap::new();
        for line in lines() {
            let (k, v) = line
                .split_once('=')
                .ok_or_else(|| format!("dict entry `{}` has no `=`", line))?;
            parse_scalar(k, key).map_err(|e| format!("key: {}", e))?;
            let value = parse_scalar(v, elem)?;
            if map.insert(k.to_string(), value).is_some() {
                return Err(format!("duplicate key `{}`", k));
            }
        }
        return Ok(Value::Dict(map));
    }
    let items = lines()
        .map(|l| parse_scalar(l, elem))
        .collect::<Result<Vec<_>, _>>()?;
    if spec.tag == VarType::Set {
        ensure_unique(&items)?;
    }
    Ok(Value::List(items))
}

fn check_text(s: &str, tag: VarType) -> Result<(), String> {
    match tag {
        VarType::Char if s.chars().count() != 1 => Err(format!("`{}` is not a single character", s)),
        VarType::Record if s.contains('\n') => Err("record text contains a newline".to_string()),
        VarType::Token => check_token(s),
        t if t.within(VarType::Enum) => check_token(s),
        _ => Ok(()),
    }
}

fn check_token(s: &str) -> Result<(), String> {
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return Err(format!("`{}` is not a token", s));
    }
    Ok(())
}

fn ensure_unique(items: &[Value]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for v in items {
        let text = v.render();
        if !seen.insert(text.clone()) {
            return Err(format!("duplicate set member `{}`", text));
        }
    }
    Ok(())
}

fn parse_datetime(t: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(t, DATETIME_FMT)
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

// `3+4i`, `-1.5-2i`, `2i`, `7`
fn parse_complex(t: &str) -> Option<(f64, f64)> {
    let Some(body) = t.strip_suffix('i') else {
        return t.parse::<f64>().ok().map(|re| (re, 0.0));
    };
    let bytes = body.as_bytes();
    let split = (1..bytes.len())
        .rev()
        .find(|&i| matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E'));
    match split {
        Some(i) => {
            let re = body[..i].parse().ok()?;
            let im = match &body[i..] {
                "+" => 1.0,
                "-" => -1.0,
                s => s.parse().ok()?,
            };
            Some((re, im))
        }
        None => {
            let im = match body {
                "" | "+" => 1.0,
                "-" => -1.0,
                s => s.parse().ok()?,
            };
            Some((0.0, im))
        }
    }
}
