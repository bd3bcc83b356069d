//! Domain model (IDs, tasks).

pub mod ids;
pub mod task;

pub use ids::{ParseTaskIdError, Sequence, SessionId, TaskId};
pub use task::Task;
