//! Domain identifiers (strongly-typed IDs).
//!
//! - **TaskId**: state machine が `(commit index, slot)` から決定的に生成する。
//!   全レプリカで同じ ID になる（乱数・時刻は使わない）。
//! - **SessionId**: consumer 側（membership 層）が ULID で生成する。state machine は観測するだけ。
//! - **Sequence**: 投入順。未割り当てタスクの FIFO 順序はこれだけで決まる。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Identifier of a task, derived from the commit that first assigned it.
///
/// Displays as `task-<index>-<slot>` and parses back from that form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    index: u64,
    slot: u32,
}

impl TaskId {
    pub fn new(index: u64, slot: u32) -> Self {
        Self { index, slot }
    }

    /// Commit index of the `Take` that generated this id.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Position within that `Take`'s selection.
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}-{}", self.index, self.slot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task id: {0:?}")]
pub struct ParseTaskIdError(String);

impl FromStr for TaskId {
    type Err = ParseTaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTaskIdError(s.to_string());
        let rest = s.strip_prefix("task-").ok_or_else(err)?;
        let (index, slot) = rest.split_once('-').ok_or_else(err)?;
        Ok(Self {
            index: index.parse().map_err(|_| err())?,
            slot: slot.parse().map_err(|_| err())?,
        })
    }
}

/// Identifier of a consumer session (lease context).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Ulid);

impl SessionId {
    /// Fresh session id. Only called client-side, never inside the state machine.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl From<Ulid> for SessionId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Insertion order of a task. Starts at 1 and never changes for a task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    pub const FIRST: Sequence = Sequence(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns the current value and advances.
    pub(crate) fn bump(&mut self) -> Sequence {
        let current = *self;
        self.0 += 1;
        current
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
