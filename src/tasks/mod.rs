pub mod gate;
pub mod registry;

// Re-export common types
pub use gate::{BatchKey, GateBook};
pub use registry::{TaskError, TaskId, TaskRecord, TaskRegistry, TaskStatus};
