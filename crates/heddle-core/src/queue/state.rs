//! Task status for the work queue.

use serde::{Deserialize, Serialize};

use crate::domain::SessionId;

/// Task status.
///
/// State transitions:
/// - Unassigned -> Assigned (Take)
/// - Assigned -> Unassigned (session expired / Release)
/// - Assigned -> removed (Complete by the owning session)
///
/// The assignee lives inside the variant, so an unassigned task cannot carry a stale session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Unassigned,
    Assigned { session: SessionId },
}

impl TaskStatus {
    /// Is this task eligible for `Take`?
    pub fn is_unassigned(self) -> bool {
        matches!(self, TaskStatus::Unassigned)
    }

    pub fn assignee(self) -> Option<SessionId> {
        match self {
            TaskStatus::Unassigned => None,
            TaskStatus::Assigned { session } => Some(session),
        }
    }

    pub fn is_held_by(self, session: SessionId) -> bool {
        self.assignee() == Some(session)
    }
}
