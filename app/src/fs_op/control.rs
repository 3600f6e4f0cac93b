//! `user.var.*` extended attributes: the record's own metadata (declared
//! type, export and read-only flags, display hint, trace level) read and
//! changed through the xattr calls. Everything else in `user.var.` is
//! reserved.

use crate::errors::{Result, VarsError};
use crate::vars::record::VariableRecord;
use crate::vars::types::{TypeSpec, VarType};
use crate::vars::value::Value;

pub const PREFIX: &str = "user.var.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Type,
    Export,
    ReadOnly,
    Imported,
    Format,
    Trace,
}

pub const ALL: [Control; 6] = [
    Control::Type,
    Control::Export,
    Control::ReadOnly,
    Control::Imported,
    Control::Format,
    Control::Trace,
];

impl Control {
    /// `Ok(None)` for names outside the control namespace.
    pub fn lookup(name: &str) -> Result<Option<Control>> {
        let Some(suffix) = name.strip_prefix(PREFIX) else {
            return Ok(None);
        };
        ALL.iter()
            .copied()
            .find(|c| c.suffix() == suffix)
            .map(Some)
            .ok_or_else(|| VarsError::Unsupported(format!("unknown control attribute `{}`", name)))
    }

    fn suffix(self) -> &'static str {
        match self {
            Control::Type => "type",
            Control::Export => "export",
            Control::ReadOnly => "readonly",
            Control::Imported => "imported",
            Control::Format => "format",
            Control::Trace => "trace",
        }
    }

    pub fn name(self) -> String {
        format!("{}{}", PREFIX, self.suffix())
    }

    pub fn get(self, rec: &VariableRecord) -> Vec<u8> {
        let text = match self {
            Control::Type => rec.spec().to_string(),
            Control::Export => flag(rec.export),
            Control::ReadOnly => flag(rec.read_only),
            Control::Imported => flag(rec.imported),
            Control::Format => rec.format.clone().unwrap_or_default(),
            Control::Trace => rec.trace_level.to_string(),
        };
        text.into_bytes()
    }

    pub fn set(self, rec: &mut VariableRecord, raw: &[u8]) -> Result<()> {
        let attr = self.name();
        let text = std::str::from_utf8(raw)
            .map_err(|e| VarsError::type_mismatch(&attr, VarType::String, e.to_string()))?;
        let text = text.strip_suffix('\n').unwrap_or(text);
        match self {
            Control::Type => {
                let spec: TypeSpec = text.parse()?;
                rec.reinterpret(spec)?;
            }
            Control::Export => rec.export = parse_flag(&attr, text)?,
            Control::ReadOnly => match (rec.read_only, parse_flag(&attr, text)?) {
                (true, false) => return Err(VarsError::ReadOnlyViolation(rec.name.clone())),
                (_, on) => rec.read_only = on,
            },
            Control::Format => rec.format = Some(text.to_string()).filter(|s| !s.is_empty()),
            Control::Trace => {
                rec.trace_level = text
                    .trim()
                    .parse()
                    .map_err(|_| VarsError::type_mismatch(&attr, "trace level 0-255", format!("got `{}`", text)))?
            }
            Control::Imported => {
                return Err(VarsError::Unsupported(format!("`{}` is maintained by the store", attr)))
            }
        }
        tracing::debug!(variable = %rec.name, attribute = %attr, value = text, "control attribute set");
        Ok(())
    }

    /// Only the display hint can be removed.
    pub fn remove(self, rec: &mut VariableRecord) -> Result<()> {
        match self {
            Control::Format => {
                rec.format = None;
                Ok(())
            }
            _ => Err(VarsError::Unsupported(format!("`{}` cannot be removed", self.name()))),
        }
    }
}

fn flag(on: bool) -> String {
    if on { "1" } else { "0" }.to_string()
}

fn parse_flag(attr: &str, text: &str) -> Result<bool> {
    match Value::parse(text.trim(), &VarType::Bool.into()) {
        Ok(Value::Bool(on)) => Ok(on),
        Ok(other) => Err(VarsError::type_mismatch(attr, VarType::Bool, format!("got {}", other.kind()))),
        Err(detail) => Err(VarsError::type_mismatch(attr, VarType::Bool, detail)),
    }
}
