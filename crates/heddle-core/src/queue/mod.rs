//! Queue module: commands, task records, and the replicated state machine.

mod command;
mod machine;
#[cfg(test)]
mod properties;
mod record;
mod snapshot;
mod state;

pub use command::{Command, LogEntry, Output};
pub use machine::WorkQueueStateMachine;
pub use record::TaskRecord;
pub use snapshot::QueueSnapshot;
pub use state::TaskStatus;
