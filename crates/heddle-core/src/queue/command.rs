//! Commands carried by the replicated log and their results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{SessionId, Task, TaskId};
use crate::observability::QueueStats;

/// Every operation the state machine understands.
///
/// Closed set: adding a variant forces every `match` in the state machine to handle it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Append one task per payload.
    Add { items: Vec<Vec<u8>> },

    /// Assign up to `max_items` unassigned tasks to `session`, oldest first.
    Take { max_items: usize, session: SessionId },

    /// Remove tasks held by `session`. Unmatched ids are ignored.
    Complete {
        task_ids: BTreeSet<TaskId>,
        session: SessionId,
    },

    /// Return tasks held by `session` to the queue without completing them.
    Release {
        task_ids: BTreeSet<TaskId>,
        session: SessionId,
    },

    /// Liveness event: everything held by `session` goes back to the queue.
    SessionExpired { session: SessionId },

    /// Drop every task. The completion counter is kept.
    Clear,

    /// Read-only query.
    Stats,
}

impl Command {
    /// Largest `Take`; slots within one take must fit a `u32`.
    pub const MAX_TAKE: usize = u32::MAX as usize;

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Add { .. } => "add",
            Command::Take { .. } => "take",
            Command::Complete { .. } => "complete",
            Command::Release { .. } => "release",
            Command::SessionExpired { .. } => "session_expired",
            Command::Clear => "clear",
            Command::Stats => "stats",
        }
    }

    /// Session the command is issued on behalf of, if any.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Command::Take { session, .. }
            | Command::Complete { session, .. }
            | Command::Release { session, .. }
            | Command::SessionExpired { session } => Some(*session),
            Command::Add { .. } | Command::Clear | Command::Stats => None,
        }
    }

    /// Structural check. Commands failing this must never be submitted.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Command::Take { max_items: 0, .. } => Err("take: max_items must be > 0".into()),
            Command::Take { max_items, .. } if *max_items > Command::MAX_TAKE => Err(format!(
                "take: max_items must be <= {}, got {max_items}",
                Command::MAX_TAKE
            )),
            Command::Complete { task_ids, .. } if task_ids.is_empty() => {
                Err("complete: task_ids must not be empty".into())
            }
            Command::Release { task_ids, .. } if task_ids.is_empty() => {
                Err("release: task_ids must not be empty".into())
            }
            Command::Add { .. }
            | Command::Take { .. }
            | Command::Complete { .. }
            | Command::Release { .. }
            | Command::SessionExpired { .. }
            | Command::Clear
            | Command::Stats => Ok(()),
        }
    }
}

/// Result of applying one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Output {
    Added { count: usize },
    Taken { tasks: Vec<Task> },
    Completed { count: usize },
    Released { count: usize },
    Requeued { count: usize },
    Cleared { count: usize },
    Stats { stats: QueueStats },
    /// Duplicate delivery or protocol violation; state unchanged.
    Ignored,
}

impl Output {
    /// Did this result put work back in front of consumers?
    pub fn made_work_available(&self) -> bool {
        match self {
            Output::Added { count } | Output::Released { count } | Output::Requeued { count } => {
                *count > 0
            }
            Output::Taken { .. }
            | Output::Completed { .. }
            | Output::Cleared { .. }
            | Output::Stats { .. }
            | Output::Ignored => false,
        }
    }
}

/// A command stamped with its commit index, as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn session() -> SessionId {
        SessionId::generate()
    }

    #[rstest]
    #[case::zero_take(Command::Take { max_items: 0, session: session() }, false)]
    #[case::take(Command::Take { max_items: 1, session: session() }, true)]
    #[case::largest_take(Command::Take { max_items: Command::MAX_TAKE, session: session() }, true)]
    #[case::empty_complete(Command::Complete { task_ids: BTreeSet::new(), session: session() }, false)]
    #[case::empty_release(Command::Release { task_ids: BTreeSet::new(), session: session() }, false)]
    #[case::empty_add(Command::Add { items: vec![] }, true)]
    #[case::clear(Command::Clear, true)]
    fn validate(#[case] command: Command, #[case] ok: bool) {
        assert_eq!(command.validate().is_ok(), ok);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn take_larger_than_slot_space_is_malformed() {
        let command = Command::Take {
            max_items: Command::MAX_TAKE + 1,
            session: session(),
        };
        assert!(command.validate().is_err());
    }

    #[test]
    fn command_json_is_tagged() {
        let json = serde_json::to_value(Command::Stats).unwrap();
        assert_eq!(json, serde_json::json!({ "op": "stats" }));
    }
}
