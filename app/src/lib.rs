pub mod errors;
pub mod fs_op;
pub mod mount;
#[path = "runner/mod.rs"]
pub mod runner;
pub mod settings;
pub mod vars;

pub use crate::errors::{PersistenceError, VarsError};
pub use crate::fs_op::{FilesystemAdapter, VarFilesystem, VarPath};
pub use crate::settings::Settings;
pub use crate::vars::{ProcessVariableTable, TypeSpec, Value, VarType, VariableRecord, VariableRegistry};
