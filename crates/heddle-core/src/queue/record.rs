//! Task record: payload + bookkeeping.

use serde::{Deserialize, Serialize};

use super::TaskStatus;
use crate::domain::{Sequence, SessionId, Task, TaskId};

/// One task in the queue.
///
/// Design:
/// - The state machine's `BTreeMap<Sequence, TaskRecord>` is the single source of truth.
/// - Indexes (by id, by session) hold `Sequence` only.
/// - `sequence` never changes; `id` is set on the first take and then kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub sequence: Sequence,
    pub id: Option<TaskId>,
    pub payload: Vec<u8>,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn new(sequence: Sequence, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            id: None,
            payload,
            status: TaskStatus::Unassigned,
        }
    }

    /// Mark as assigned. `fresh_id` is used only if the task has never been taken.
    pub fn assign(&mut self, session: SessionId, fresh_id: TaskId) -> TaskId {
        let id = *self.id.get_or_insert(fresh_id);
        self.status = TaskStatus::Assigned { session };
        id
    }

    /// Back to the queue at the original sequence.
    pub fn unassign(&mut self) {
        self.status = TaskStatus::Unassigned;
    }

    /// What the consumer sees. Only meaningful once an id exists.
    pub fn to_task(&self) -> Option<Task> {
        self.id.map(|id| Task::new(id, self.payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_assignment_fixes_the_id() {
        let session = SessionId::generate();
        let mut record = TaskRecord::new(Sequence::new(1), b"a".to_vec());
        assert_eq!(record.to_task(), None);

        let id = record.assign(session, TaskId::new(5, 0));
        assert_eq!(id, TaskId::new(5, 0));
        assert!(record.status.is_held_by(session));

        record.unassign();
        assert!(record.status.is_unassigned());

        let other = SessionId::generate();
        let again = record.assign(other, TaskId::new(9, 2));
        assert_eq!(again, TaskId::new(5, 0));
        assert!(record.status.is_held_by(other));
        assert_eq!(record.sequence, Sequence::new(1));
    }
}
