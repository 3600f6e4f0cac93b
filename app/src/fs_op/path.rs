use std::fmt;
use std::str::FromStr;

use crate::errors::VarsError;

/// A parsed path under the mount: `/`, `/<pid>` or
/// `/<pid>/<name>[/<key>]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarPath {
    Root,
    Process(u32),
    /// `keys` address into a collection value. They parse, but no
    /// operation accepts them yet.
    Variable {
        pid: u32,
        name: String,
        keys: Vec<String>,
    },
}

impl VarPath {
    pub fn variable(pid: u32, name: impl Into<String>) -> Self {
        VarPath::Variable {
            pid,
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            VarPath::Root => None,
            VarPath::Process(pid) | VarPath::Variable { pid, .. } => Some(*pid),
        }
    }

    /// `(pid, name)` of a plain variable path.
    pub fn as_variable(&self) -> Result<(u32, &str), VarsError> {
        match self {
            VarPath::Variable { pid, name, keys } if keys.is_empty() => Ok((*pid, name)),
            VarPath::Variable { .. } => Err(VarsError::Unsupported(format!(
                "`{}`: addressing inside a collection is not implemented",
                self
            ))),
            VarPath::Root | VarPath::Process(_) => Err(VarsError::IsADirectory(self.to_string())),
        }
    }

    /// Path of the entry `name` inside this directory.
    pub fn join(&self, name: &str) -> Result<VarPath, VarsError> {
        match self {
            VarPath::Root => format!("/{}", name).parse(),
            VarPath::Process(pid) => format!("/{}/{}", pid, name).parse(),
            VarPath::Variable { .. } => Err(VarsError::NotADirectory(self.to_string())),
        }
    }

    pub fn parent(&self) -> Option<VarPath> {
        match self {
            VarPath::Root => None,
            VarPath::Process(_) => Some(VarPath::Root),
            VarPath::Variable { pid, name, keys } => Some(match keys.split_last() {
                Some((_, rest)) => VarPath::Variable {
                    pid: *pid,
                    name: name.clone(),
                    keys: rest.to_vec(),
                },
                None => VarPath::Process(*pid),
            }),
        }
    }
}

impl FromStr for VarPath {
    type Err = VarsError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || VarsError::InvalidPath(input.to_string());
        let rest = input.strip_prefix('/').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Ok(VarPath::Root);
        }
        // A single trailing slash is tolerated (`/123/`).
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let mut segments = rest.split('/');

        let pid: u32 = segments
            .next()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .filter(|&p| p != 0)
            .ok_or_else(invalid)?;

        let Some(name) = segments.next() else {
            return Ok(VarPath::Process(pid));
        };
        let mut keys = Vec::new();
        for seg in segments {
            check_segment(seg).map_err(|_| invalid())?;
            keys.push(seg.to_string());
        }
        check_segment(name).map_err(|_| invalid())?;
        Ok(VarPath::Variable {
            pid,
            name: name.to_string(),
            keys,
        })
    }
}

fn check_segment(seg: &str) -> Result<(), ()> {
    if seg.is_empty() || seg == "." || seg == ".." || seg.contains('\0') {
        return Err(());
    }
    Ok(())
}

impl fmt::Display for VarPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarPath::Root => f.write_str("/"),
            VarPath::Process(pid) => write!(f, "/{}", pid),
            VarPath::Variable { pid, name, keys } => {
                write!(f, "/{}/{}", pid, name)?;
                for k in keys {
                    write!(f, "/{}", k)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Result<VarPath, VarsError> {
        s.parse()
    }

    #[test]
    fn grammar_levels() {
        assert_eq!(p("/").unwrap(), VarPath::Root);
        assert_eq!(p("/123").unwrap(), VarPath::Process(123));
        assert_eq!(p("/123/").unwrap(), VarPath::Process(123));
        assert_eq!(p("/123/PATH").unwrap(), VarPath::variable(123, "PATH"));
        assert_eq!(
            p("/123/map/a/2").unwrap(),
            VarPath::Variable {
                pid: 123,
                name: "map".into(),
                keys: vec!["a".into(), "2".into()],
            }
        );
    }

    #[test]
    fn malformed_paths_are_invalid() {
        for bad in ["", "123/PATH", "/abc", "/0/X", "/-1/X", "/1//X", "/1/..", "/1/X//y", "/+5"] {
            assert!(matches!(p(bad), Err(VarsError::InvalidPath(_))), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn display_round_trips() {
        for s in ["/", "/7", "/7/HOME", "/7/m/k"] {
            assert_eq!(p(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn key_segments_are_not_plain_variables() {
        let path = p("/1/list/0").unwrap();
        assert!(matches!(path.as_variable(), Err(VarsError::Unsupported(_))));
        assert_eq!(path.parent(), Some(VarPath::variable(1, "list")));
        assert!(matches!(VarPath::Root.as_variable(), Err(VarsError::IsADirectory(_))));
    }
}
