//! LocalReplicatedLog - 単一ノードの replicated log（開発・テスト用）
//!
//! - commit index を振って state machine に順番に適用する
//! - エントリは EntryCodec で pooled buffer にエンコードして保持する（永続化の代わり）
//! - エントリが溜まったらスナップショットを取って compaction
//! - `replay()` でスナップショット + 残りのエントリから state machine を再構築できる
//!
//! state machine の更新は Mutex の中で 1 件ずつ。エンコードはロックの外で行う。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::EntryCodec;
use crate::buffer::{BufferPool, SharedBuffer};
use crate::domain::SessionId;
use crate::observability::QueueStats;
use crate::ports::{Committed, LogError, ReplicatedLog};
use crate::queue::{Command, LogEntry, QueueSnapshot, WorkQueueStateMachine};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalLogConfig {
    /// First buffer size tried when encoding an entry.
    pub initial_entry_capacity: usize,

    /// Entries kept before the log compacts into a snapshot.
    pub max_retained_entries: usize,
}

impl Default for LocalLogConfig {
    fn default() -> Self {
        Self {
            initial_entry_capacity: 1024,
            max_retained_entries: 4096,
        }
    }
}

struct StoredEntry {
    index: u64,
    bytes: SharedBuffer,
}

struct StoredSnapshot {
    last_applied: u64,
    bytes: SharedBuffer,
}

struct LogState {
    machine: WorkQueueStateMachine,
    next_index: u64,
    entries: VecDeque<StoredEntry>,
    snapshot: Option<StoredSnapshot>,
    /// Sessions whose expiry was applied. Only grows; its size is bounded by the
    /// membership service's session churn, which decides when expiries happen.
    expired: HashSet<SessionId>,
    closed: bool,
}

/// In-process stand-in for a consensus-backed log.
pub struct LocalReplicatedLog {
    codec: EntryCodec,
    config: LocalLogConfig,
    state: Mutex<LogState>,
    notify: Arc<Notify>,
}

impl LocalReplicatedLog {
    pub fn new(pool: BufferPool, config: LocalLogConfig) -> Self {
        Self {
            codec: EntryCodec::new(pool, config.initial_entry_capacity),
            config,
            state: Mutex::new(LogState {
                machine: WorkQueueStateMachine::new(),
                next_index: 1,
                entries: VecDeque::new(),
                snapshot: None,
                expired: HashSet::new(),
                closed: false,
            }),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        self.codec.pool()
    }

    /// Stats straight from the local replica, without going through the log.
    pub fn local_stats(&self) -> QueueStats {
        self.state.lock().machine.stats()
    }

    pub fn last_applied(&self) -> u64 {
        self.state.lock().machine.last_applied()
    }

    /// Entries retained since the last compaction.
    pub fn retained_entries(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Sessions this log refuses commands from.
    pub fn expired_sessions(&self) -> usize {
        self.state.lock().expired.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().machine.snapshot()
    }

    /// Stop accepting commands.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Encode, then check, number and apply under one lock.
    ///
    /// Any session the command names must still be live. A `SessionExpired` entry
    /// marks its session expired only once it has been applied, so a failed append
    /// leaves the session's tasks where a retry can still requeue them.
    fn append(&self, command: Command) -> Result<Committed, LogError> {
        let bytes = self.codec.encode(&command)?.share();

        let (committed, retained) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(LogError::Closed);
            }
            if let Some(session) = command.session()
                && state.expired.contains(&session)
            {
                return Err(LogError::SessionExpired(session));
            }
            let expiring = match &command {
                Command::SessionExpired { session } => Some(*session),
                _ => None,
            };

            let index = state.next_index;
            state.next_index += 1;
            let output = state.machine.apply_entry(LogEntry { index, command });
            state.entries.push_back(StoredEntry { index, bytes });
            if let Some(session) = expiring {
                state.expired.insert(session);
            }
            (Committed { index, output }, state.entries.len())
        };

        if committed.output.made_work_available() {
            self.notify.notify_waiters();
        }
        if retained > self.config.max_retained_entries {
            self.compact()?;
        }
        Ok(committed)
    }

    /// Snapshot the state machine and drop the entries it covers.
    pub fn compact(&self) -> Result<(), LogError> {
        let snapshot = self.state.lock().machine.snapshot();
        let last_applied = snapshot.last_applied;
        let bytes = self.codec.encode(&snapshot)?.share();

        let mut state = self.state.lock();
        if state
            .snapshot
            .as_ref()
            .is_some_and(|s| s.last_applied >= last_applied)
        {
            return Ok(());
        }
        while state
            .entries
            .front()
            .is_some_and(|e| e.index <= last_applied)
        {
            state.entries.pop_front();
        }
        state.snapshot = Some(StoredSnapshot {
            last_applied,
            bytes,
        });
        debug!(last_applied, retained = state.entries.len(), "log compacted");
        Ok(())
    }

    /// Rebuild a state machine from the stored snapshot and entries, as a restarting replica would.
    pub fn replay(&self) -> Result<WorkQueueStateMachine, LogError> {
        let (snapshot, entries) = {
            let state = self.state.lock();
            let snapshot = state.snapshot.as_ref().map(|s| s.bytes.clone());
            let entries: Vec<(u64, SharedBuffer)> = state
                .entries
                .iter()
                .map(|e| (e.index, e.bytes.clone()))
                .collect();
            (snapshot, entries)
        };

        let mut machine = match snapshot {
            Some(bytes) => WorkQueueStateMachine::restore(self.codec.decode(&bytes)?),
            None => WorkQueueStateMachine::new(),
        };
        for (index, bytes) in entries {
            let command: Command = self.codec.decode(&bytes)?;
            machine.apply_entry(LogEntry { index, command });
        }
        Ok(machine)
    }
}

#[async_trait]
impl ReplicatedLog for LocalReplicatedLog {
    async fn submit(&self, command: Command) -> Result<Committed, LogError> {
        if let Command::SessionExpired { .. } = command {
            return Err(LogError::Rejected(
                "session expiry is reported by the liveness service".into(),
            ));
        }
        command.validate().map_err(LogError::Rejected)?;
        self.append(command)
    }

    async fn expire_session(&self, session: SessionId) -> Result<Committed, LogError> {
        info!(%session, "session expiry received");
        self.append(Command::SessionExpired { session })
    }

    fn task_available(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}
