//! Filesystem call surface over the variable store.

pub mod adapter;
pub mod control;
pub mod metadata;
pub mod ops;
pub mod path;
pub mod stat;
pub mod symlink;

pub use adapter::{AdapterOptions, FilesystemAdapter};
pub use ops::VarFilesystem;
pub use path::VarPath;
pub use stat::{AttrChange, DirEntry, NodeKind, StatFs, VarAttr};
