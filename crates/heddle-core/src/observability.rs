use serde::{Deserialize, Serialize};

/// Queue counts at some committed state.
///
/// `pending + in_process` equals tasks created minus tasks completed (and cleared).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Unassigned tasks waiting to be taken.
    pub pending: usize,
    /// Tasks assigned to a live session.
    pub in_process: usize,
    /// Cumulative completions.
    pub completed_total: u64,
}
