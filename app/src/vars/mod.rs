//! The variable store: typed records, per-process tables and the registry
//! that ties tables to live processes.

pub mod format;
pub mod liveness;
pub mod persist;
pub mod record;
pub mod registry;
pub mod table;
pub mod types;
pub mod value;

pub use liveness::{Liveness, ProcessProbe, SignalProbe};
pub use persist::LineCodec;
pub use record::{TraceEvent, VariableRecord};
pub use registry::{DefunctReport, VariableRegistry};
pub use table::ProcessVariableTable;
pub use types::{TypeSpec, VarType};
pub use value::Value;
