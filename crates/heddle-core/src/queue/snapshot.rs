use serde::{Deserialize, Serialize};

use super::TaskRecord;
use crate::domain::Sequence;

/// Full state machine image.
///
/// Records are in sequence order, so two replicas in the same state serialize identically.
/// Session holdings and the id index are not stored; `restore` derives them from the records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub last_applied: u64,
    pub next_sequence: Sequence,
    pub completed_total: u64,
    pub tasks: Vec<TaskRecord>,
}
