use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the variable store and the filesystem call surface.
///
/// Every variant is local to one call: nothing here is fatal to the
/// process hosting the store, callers retry with corrected input.
#[derive(Error, Debug)]
pub enum VarsError {
    /// No record, link or node at the given path.
    #[error("not found: {0}")]
    NotFound(String),

    /// No table registered for the process.
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    /// The process already has a table.
    #[error("process {0} is already registered")]
    DuplicateProcess(u32),

    /// Mutation attempted on a read-only record.
    #[error("variable `{0}` is read-only")]
    ReadOnlyViolation(String),

    /// Value shape does not fit the declared type.
    #[error("type mismatch for `{name}`: expected {expected}, {detail}")]
    TypeMismatch {
        name: String,
        expected: String,
        detail: String,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Path does not follow `/<pid>/<name>[/<key>]*`.
    #[error("invalid path `{0}`")]
    InvalidPath(String),

    /// Parent-chain walk revisited a process or went past the depth cap.
    #[error("inheritance chain from process {start} looks cyclic (gave up after {depth} steps)")]
    InheritanceCycleSuspected { start: u32, depth: usize },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Content would grow past the configured size limit.
    #[error("`{name}` would grow to {size} bytes (limit {limit})")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Failures while saving or loading a table file.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{}` line {line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl VarsError {
    pub(crate) fn type_mismatch(
        name: impl Into<String>,
        expected: impl ToString,
        detail: impl Into<String>,
    ) -> Self {
        VarsError::TypeMismatch {
            name: name.into(),
            expected: expected.to_string(),
            detail: detail.into(),
        }
    }

    /// Errno reported to the kernel when a call fails with this error.
    pub fn errno(&self) -> i32 {
        match self {
            VarsError::NotFound(_) | VarsError::NoSuchProcess(_) => libc::ENOENT,
            VarsError::DuplicateProcess(_) | VarsError::AlreadyExists(_) => libc::EEXIST,
            VarsError::ReadOnlyViolation(_) => libc::EACCES,
            VarsError::TypeMismatch { .. } | VarsError::InvalidPath(_) | VarsError::Config(_) => {
                libc::EINVAL
            }
            VarsError::Persistence(_) => libc::EIO,
            VarsError::InheritanceCycleSuspected { .. } => libc::ELOOP,
            VarsError::NotADirectory(_) => libc::ENOTDIR,
            VarsError::IsADirectory(_) => libc::EISDIR,
            VarsError::NotEmpty(_) => libc::ENOTEMPTY,
            VarsError::Unsupported(_) => libc::ENOTSUP,
            VarsError::TooLarge { .. } => libc::EFBIG,
        }
    }

    /// Errno for a failed name lookup. A name that cannot be a pid or a
    /// variable simply does not exist there.
    pub fn lookup_errno(&self) -> i32 {
        match self {
            VarsError::InvalidPath(_) => libc::ENOENT,
            other => other.errno(),
        }
    }
}

pub type Result<T, E = VarsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_lookup_failures() {
        assert_eq!(VarsError::NotFound("/1/x".into()).errno(), libc::ENOENT);
        assert_eq!(VarsError::NoSuchProcess(7).errno(), libc::ENOENT);
        assert_eq!(VarsError::ReadOnlyViolation("X".into()).errno(), libc::EACCES);
        assert_eq!(
            VarsError::InheritanceCycleSuspected { start: 1, depth: 2 }.errno(),
            libc::ELOOP
        );
    }

    #[test]
    fn lookup_of_impossible_names_is_enoent() {
        assert_eq!(VarsError::InvalidPath("/.Trash".into()).lookup_errno(), libc::ENOENT);
        assert_eq!(VarsError::InvalidPath("/.Trash".into()).errno(), libc::EINVAL);
        assert_eq!(VarsError::NotADirectory("/1/X".into()).lookup_errno(), libc::ENOTDIR);
        let big = VarsError::TooLarge {
            name: "X".into(),
            size: 1 << 46,
            limit: 1 << 20,
        };
        assert_eq!(big.errno(), libc::EFBIG);
    }

    #[test]
    fn persistence_error_message_names_line() {
        let err: VarsError = PersistenceError::Malformed {
            path: PathBuf::from("vars.csv"),
            line: 3,
            reason: "expected 3 fields, found 2".into(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("vars.csv"));
        assert!(msg.contains("line 3"));
    }
}
