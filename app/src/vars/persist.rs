//! Flat text encoding for saved tables.
//!
//! One record per line, `name<D>type<D>value`. Inside every field a
//! backslash, a newline and the delimiter are written as `\\`, `\n` and
//! `\<D>`, so a line never contains a raw newline and splitting on an
//! unescaped delimiter recovers the fields exactly.

use crate::errors::VarsError;

pub const DEFAULT_DELIMITER: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCodec {
    delimiter: char,
}

impl Default for LineCodec {
    fn default() -> Self {
        LineCodec {
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl LineCodec {
    /// The delimiter may not be a character the escaping itself uses.
    pub fn new(delimiter: char) -> Result<Self, VarsError> {
        if matches!(delimiter, '\\' | '\n' | '\r' | 'n') {
            return Err(VarsError::Config(format!(
                "{:?} cannot be used as the save delimiter",
                delimiter
            )));
        }
        Ok(LineCodec { delimiter })
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn sanitize(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                c if c == self.delimiter => {
                    out.push('\\');
                    out.push(c);
                }
                c => out.push(c),
            }
        }
        out
    }

    pub fn unsanitize(&self, s: &str) -> Result<String, String> {
        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some(d) if d == self.delimiter => out.push(d),
                Some(other) => return Err(format!("unknown escape `\\{}`", other)),
                None => return Err("dangling backslash at end of field".to_string()),
            }
        }
        Ok(out)
    }

    pub fn encode(&self, fields: &[&str]) -> String {
        let mut line = String::new();
        for (i, f) in fields.iter().enumerate() {
            if i > 0 {
                line.push(self.delimiter);
            }
            line.push_str(&self.sanitize(f));
        }
        line
    }

    /// Split on unescaped delimiters and unescape each field.
    pub fn decode(&self, line: &str) -> Result<Vec<String>, String> {
        let mut raw = Vec::new();
        let mut current = String::new();
        let mut chars = line.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            } else if c == self.delimiter {
                raw.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        raw.push(current);
        raw.iter().map(|f| self.unsanitize(f)).collect()
    }
}
