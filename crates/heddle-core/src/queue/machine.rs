//! Deterministic work queue state machine.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, error, info};

use super::{Command, LogEntry, Output, QueueSnapshot, TaskRecord, TaskStatus};
use crate::domain::{Sequence, SessionId, TaskId};
use crate::observability::QueueStats;

/// Work queue state, mutated only by [`WorkQueueStateMachine::apply`].
///
/// Every replica applies the same entries in the same order and ends in the same state.
/// Nothing here reads the clock or a random source: task ids come from
/// `(commit index, slot within the Take)`.
#[derive(Debug)]
pub struct WorkQueueStateMachine {
    /// All live tasks in FIFO order (source of truth).
    tasks: BTreeMap<Sequence, TaskRecord>,

    /// Unassigned subset of `tasks`, scanned by `Take`.
    unassigned: BTreeSet<Sequence>,

    /// id -> sequence for tasks that have been taken at least once.
    ids: HashMap<TaskId, Sequence>,

    /// Session registry: what each live session holds.
    /// Created on a session's first `Take`, dropped on expiry.
    sessions: HashMap<SessionId, BTreeSet<Sequence>>,

    next_sequence: Sequence,
    completed_total: u64,
    last_applied: u64,
}

impl WorkQueueStateMachine {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            unassigned: BTreeSet::new(),
            ids: HashMap::new(),
            sessions: HashMap::new(),
            next_sequence: Sequence::FIRST,
            completed_total: 0,
            last_applied: 0,
        }
    }

    /// Index of the last entry applied (0 before the first one).
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.unassigned.len(),
            in_process: self.tasks.len() - self.unassigned.len(),
            completed_total: self.completed_total,
        }
    }

    /// Tasks ever created (sequence numbers handed out).
    pub fn created_total(&self) -> u64 {
        self.next_sequence.get() - 1
    }

    /// Sessions currently holding at least one task.
    pub fn sessions(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.keys().copied()
    }

    /// Tasks held by `session`, in sequence order.
    pub fn held_by(&self, session: SessionId) -> Vec<TaskId> {
        self.sessions
            .get(&session)
            .into_iter()
            .flatten()
            .filter_map(|seq| self.tasks.get(seq).and_then(|r| r.id))
            .collect()
    }

    pub fn record(&self, id: TaskId) -> Option<&TaskRecord> {
        self.ids.get(&id).and_then(|seq| self.tasks.get(seq))
    }

    /// Apply a committed entry.
    pub fn apply_entry(&mut self, entry: LogEntry) -> Output {
        self.apply(entry.index, entry.command)
    }

    /// Apply the command committed at `index`.
    ///
    /// Indices must be strictly increasing; a replayed index is ignored.
    pub fn apply(&mut self, index: u64, command: Command) -> Output {
        if index <= self.last_applied {
            error!(
                index,
                last_applied = self.last_applied,
                kind = command.kind(),
                "entry already applied, ignoring"
            );
            return Output::Ignored;
        }
        self.last_applied = index;

        if let Err(reason) = command.validate() {
            // facade が弾くはずのもの。ここに来たらプロトコル違反
            error!(index, kind = command.kind(), %reason, "malformed command reached the state machine");
            debug_assert!(false, "malformed command at index {index}: {reason}");
            return Output::Ignored;
        }

        let kind = command.kind();
        let output = match command {
            Command::Add { items } => self.add(items),
            Command::Take { max_items, session } => self.take(index, max_items, session),
            Command::Complete { task_ids, session } => self.complete(&task_ids, session),
            Command::Release { task_ids, session } => self.release(&task_ids, session),
            Command::SessionExpired { session } => self.expire(session),
            Command::Clear => self.clear(),
            Command::Stats => Output::Stats {
                stats: self.stats(),
            },
        };
        debug!(index, kind, ?output, "applied");
        output
    }

    fn add(&mut self, items: Vec<Vec<u8>>) -> Output {
        let count = items.len();
        for payload in items {
            let sequence = self.next_sequence.bump();
            self.tasks.insert(sequence, TaskRecord::new(sequence, payload));
            self.unassigned.insert(sequence);
        }
        Output::Added { count }
    }

    fn take(&mut self, index: u64, max_items: usize, session: SessionId) -> Output {
        let selected: Vec<Sequence> = self
            .unassigned
            .iter()
            .take(max_items.min(Command::MAX_TAKE))
            .copied()
            .collect();
        if selected.is_empty() {
            return Output::Taken { tasks: Vec::new() };
        }

        let held = self.sessions.entry(session).or_default();
        let mut tasks = Vec::with_capacity(selected.len());
        for (slot, sequence) in (0..=u32::MAX).zip(selected) {
            self.unassigned.remove(&sequence);
            let Some(record) = self.tasks.get_mut(&sequence) else {
                continue;
            };
            let id = record.assign(session, TaskId::new(index, slot));
            self.ids.insert(id, sequence);
            held.insert(sequence);
            tasks.extend(record.to_task());
        }
        Output::Taken { tasks }
    }

    /// Owning session's sequence for `id`, if the task is currently held by it.
    fn owned(&self, id: &TaskId, session: SessionId) -> Option<Sequence> {
        let sequence = *self.ids.get(id)?;
        let record = self.tasks.get(&sequence)?;
        record.status.is_held_by(session).then_some(sequence)
    }

    fn complete(&mut self, task_ids: &BTreeSet<TaskId>, session: SessionId) -> Output {
        let mut count = 0;
        for id in task_ids {
            let Some(sequence) = self.owned(id, session) else {
                continue;
            };
            self.tasks.remove(&sequence);
            self.ids.remove(id);
            self.forget_holding(session, sequence);
            self.completed_total += 1;
            count += 1;
        }
        Output::Completed { count }
    }

    fn release(&mut self, task_ids: &BTreeSet<TaskId>, session: SessionId) -> Output {
        let mut count = 0;
        for id in task_ids {
            let Some(sequence) = self.owned(id, session) else {
                continue;
            };
            if let Some(record) = self.tasks.get_mut(&sequence) {
                record.unassign();
            }
            self.unassigned.insert(sequence);
            self.forget_holding(session, sequence);
            count += 1;
        }
        Output::Released { count }
    }

    fn expire(&mut self, session: SessionId) -> Output {
        let held = self.sessions.remove(&session).unwrap_or_default();
        let count = held.len();
        for sequence in held {
            if let Some(record) = self.tasks.get_mut(&sequence) {
                record.unassign();
                self.unassigned.insert(sequence);
            }
        }
        if count > 0 {
            info!(%session, requeued = count, "session expired, tasks returned to queue");
        }
        Output::Requeued { count }
    }

    fn clear(&mut self) -> Output {
        let count = self.tasks.len();
        self.tasks.clear();
        self.unassigned.clear();
        self.ids.clear();
        self.sessions.clear();
        Output::Cleared { count }
    }

    fn forget_holding(&mut self, session: SessionId, sequence: Sequence) {
        if let Some(held) = self.sessions.get_mut(&session) {
            held.remove(&sequence);
            if held.is_empty() {
                self.sessions.remove(&session);
            }
        }
    }

    /// Serializable copy of the full state.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            last_applied: self.last_applied,
            next_sequence: self.next_sequence,
            completed_total: self.completed_total,
            tasks: self.tasks.values().cloned().collect(),
        }
    }

    /// Rebuild from a snapshot. Indexes and the session registry are derived from the records.
    pub fn restore(snapshot: QueueSnapshot) -> Self {
        let mut machine = Self {
            next_sequence: snapshot.next_sequence,
            completed_total: snapshot.completed_total,
            last_applied: snapshot.last_applied,
            ..Self::new()
        };
        for record in snapshot.tasks {
            let sequence = record.sequence;
            if let Some(id) = record.id {
                machine.ids.insert(id, sequence);
            }
            match record.status {
                TaskStatus::Unassigned => {
                    machine.unassigned.insert(sequence);
                }
                TaskStatus::Assigned { session } => {
                    machine.sessions.entry(session).or_default().insert(sequence);
                }
            }
            machine.tasks.insert(sequence, record);
        }
        machine
    }

    /// Cross-check the indexes against the records.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut assigned: HashMap<SessionId, BTreeSet<Sequence>> = HashMap::new();
        for (sequence, record) in &self.tasks {
            if *sequence != record.sequence {
                return Err(format!("record keyed {sequence} has sequence {}", record.sequence));
            }
            if *sequence >= self.next_sequence {
                return Err(format!("sequence {sequence} not below next {}", self.next_sequence));
            }
            match record.status {
                TaskStatus::Unassigned => {
                    if !self.unassigned.contains(sequence) {
                        return Err(format!("unassigned task {sequence} missing from scan set"));
                    }
                }
                TaskStatus::Assigned { session } => {
                    if record.id.is_none() {
                        return Err(format!("assigned task {sequence} has no id"));
                    }
                    if self.unassigned.contains(sequence) {
                        return Err(format!("assigned task {sequence} in scan set"));
                    }
                    assigned.entry(session).or_default().insert(*sequence);
                }
            }
            if let Some(id) = record.id
                && self.ids.get(&id) != Some(sequence)
            {
                return Err(format!("id {id} not indexed to {sequence}"));
            }
        }
        if self.unassigned.len() > self.tasks.len() {
            return Err("scan set larger than task map".into());
        }
        if self.ids.len() != self.tasks.values().filter(|r| r.id.is_some()).count() {
            return Err("stale entries in id index".into());
        }
        if assigned != self.sessions {
            return Err("session registry disagrees with task records".into());
        }
        Ok(())
    }
}

impl Default for WorkQueueStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::Task;

    struct Harness {
        machine: WorkQueueStateMachine,
        index: u64,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                machine: WorkQueueStateMachine::new(),
                index: 0,
            }
        }

        fn apply(&mut self, command: Command) -> Output {
            self.index += 1;
            let output = self.machine.apply(self.index, command);
            self.machine.check_invariants().unwrap();
            output
        }

        fn add(&mut self, items: &[&str]) {
            let items = items.iter().map(|s| s.as_bytes().to_vec()).collect();
            assert!(matches!(self.apply(Command::Add { items }), Output::Added { .. }));
        }

        fn take(&mut self, max_items: usize, session: SessionId) -> Vec<Task> {
            match self.apply(Command::Take { max_items, session }) {
                Output::Taken { tasks } => tasks,
                other => panic!("unexpected output: {other:?}"),
            }
        }

        fn complete(&mut self, ids: &[TaskId], session: SessionId) -> usize {
            let task_ids = ids.iter().copied().collect();
            match self.apply(Command::Complete { task_ids, session }) {
                Output::Completed { count } => count,
                other => panic!("unexpected output: {other:?}"),
            }
        }

        fn expire(&mut self, session: SessionId) -> usize {
            match self.apply(Command::SessionExpired { session }) {
                Output::Requeued { count } => count,
                other => panic!("unexpected output: {other:?}"),
            }
        }
    }

    fn payloads(tasks: &[Task]) -> Vec<&[u8]> {
        tasks.iter().map(|t| t.payload().as_slice()).collect()
    }

    #[test]
    fn add_take_complete_scenario() {
        let mut h = Harness::new();
        let s = SessionId::generate();
        h.add(&["a", "b", "c"]);

        let tasks = h.take(2, s);
        assert_eq!(payloads(&tasks), vec![b"a".as_slice(), b"b".as_slice()]);
        assert_ne!(tasks[0].id(), tasks[1].id());
        assert_eq!(
            h.machine.stats(),
            QueueStats { pending: 1, in_process: 2, completed_total: 0 }
        );

        assert_eq!(h.complete(&[tasks[0].id()], s), 1);
        assert_eq!(
            h.machine.stats(),
            QueueStats { pending: 1, in_process: 1, completed_total: 1 }
        );
    }

    #[test]
    fn take_on_empty_queue_returns_nothing() {
        let mut h = Harness::new();
        assert!(h.take(5, SessionId::generate()).is_empty());
        assert_eq!(h.machine.sessions().count(), 0);
    }

    #[test]
    fn take_assigns_deterministic_ids() {
        let mut h = Harness::new();
        h.add(&["a", "b"]);
        let tasks = h.take(2, SessionId::generate());
        // Take was the second entry
        assert_eq!(tasks[0].id(), TaskId::new(2, 0));
        assert_eq!(tasks[1].id(), TaskId::new(2, 1));
    }

    #[test]
    fn fifo_across_single_takes() {
        let mut h = Harness::new();
        let s = SessionId::generate();
        h.add(&["1", "2"]);
        h.add(&["3"]);
        let got: Vec<Vec<u8>> = (0..3)
            .map(|_| h.take(1, s).remove(0).into_payload())
            .collect();
        assert_eq!(got, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn complete_is_idempotent() {
        let mut h = Harness::new();
        let s = SessionId::generate();
        h.add(&["a"]);
        let id = h.take(1, s)[0].id();

        assert_eq!(h.complete(&[id], s), 1);
        assert_eq!(h.complete(&[id], s), 0);
        assert_eq!(h.machine.stats().completed_total, 1);
    }

    #[rstest]
    #[case::wrong_session(false, true)]
    #[case::unknown_id(true, false)]
    fn unmatched_completions_are_ignored(#[case] same_session: bool, #[case] known_id: bool) {
        let mut h = Harness::new();
        let owner = SessionId::generate();
        h.add(&["a"]);
        let taken = h.take(1, owner)[0].id();

        let session = if same_session { owner } else { SessionId::generate() };
        let id = if known_id { taken } else { TaskId::new(99, 0) };
        assert_eq!(h.complete(&[id], session), 0);
        assert_eq!(
            h.machine.stats(),
            QueueStats { pending: 0, in_process: 1, completed_total: 0 }
        );
    }

    #[test]
    fn partial_batch_completes_matching_ids() {
        let mut h = Harness::new();
        let s = SessionId::generate();
        h.add(&["a", "b"]);
        let tasks = h.take(2, s);
        let count = h.complete(&[tasks[1].id(), TaskId::new(1000, 0)], s);
        assert_eq!(count, 1);
        assert_eq!(h.machine.held_by(s), vec![tasks[0].id()]);
    }

    #[test]
    fn expiry_requeues_at_original_position() {
        let mut h = Harness::new();
        let crashed = SessionId::generate();
        let survivor = SessionId::generate();
        h.add(&["a", "b"]);
        let taken = h.take(2, crashed);
        h.add(&["c"]);

        assert_eq!(h.expire(crashed), 2);
        assert_eq!(h.machine.stats().pending, 3);

        let again = h.take(5, survivor);
        assert_eq!(
            payloads(&again),
            vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]
        );
        // ids survive reassignment
        assert_eq!(again[0].id(), taken[0].id());
        assert_eq!(again[1].id(), taken[1].id());
    }

    #[test]
    fn expired_session_cannot_complete_reassigned_task() {
        let mut h = Harness::new();
        let first = SessionId::generate();
        let second = SessionId::generate();
        h.add(&["a"]);
        let id = h.take(1, first)[0].id();
        h.expire(first);
        h.take(1, second);

        assert_eq!(h.complete(&[id], first), 0);
        assert_eq!(h.complete(&[id], second), 1);
    }

    #[test]
    fn expiring_unknown_session_is_a_noop() {
        let mut h = Harness::new();
        assert_eq!(h.expire(SessionId::generate()), 0);
    }

    #[test]
    fn release_returns_tasks_without_completing() {
        let mut h = Harness::new();
        let s = SessionId::generate();
        h.add(&["a", "b"]);
        let tasks = h.take(2, s);

        let task_ids = [tasks[0].id()].into_iter().collect();
        let out = h.apply(Command::Release { task_ids, session: s });
        assert_eq!(out, Output::Released { count: 1 });
        assert_eq!(
            h.machine.stats(),
            QueueStats { pending: 1, in_process: 1, completed_total: 0 }
        );
        assert_eq!(h.take(1, s)[0].id(), tasks[0].id());
    }

    #[test]
    fn clear_drops_everything_but_the_counter() {
        let mut h = Harness::new();
        let s = SessionId::generate();
        h.add(&["a", "b", "c"]);
        let id = h.take(1, s)[0].id();
        h.complete(&[id], s);
        h.take(1, s);

        assert_eq!(h.apply(Command::Clear), Output::Cleared { count: 2 });
        assert_eq!(
            h.machine.stats(),
            QueueStats { pending: 0, in_process: 0, completed_total: 1 }
        );
        assert_eq!(h.machine.sessions().count(), 0);
    }

    #[test]
    fn stats_query_does_not_mutate() {
        let mut h = Harness::new();
        h.add(&["a"]);
        let before = h.machine.snapshot();
        let out = h.apply(Command::Stats);
        assert_eq!(
            out,
            Output::Stats { stats: QueueStats { pending: 1, in_process: 0, completed_total: 0 } }
        );
        assert_eq!(h.machine.snapshot().tasks, before.tasks);
    }

    #[test]
    fn replayed_index_is_ignored() {
        let mut machine = WorkQueueStateMachine::new();
        machine.apply(1, Command::Add { items: vec![b"a".to_vec()] });
        let out = machine.apply(1, Command::Add { items: vec![b"a".to_vec()] });
        assert_eq!(out, Output::Ignored);
        assert_eq!(machine.stats().pending, 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "malformed command")]
    fn malformed_command_is_fatal_in_debug() {
        let mut machine = WorkQueueStateMachine::new();
        machine.apply(1, Command::Take { max_items: 0, session: SessionId::generate() });
    }

    #[test]
    fn snapshot_restore_preserves_behaviour() {
        let mut h = Harness::new();
        let s = SessionId::generate();
        h.add(&["a", "b", "c"]);
        let taken = h.take(2, s);
        h.complete(&[taken[0].id()], s);

        let restored = WorkQueueStateMachine::restore(h.machine.snapshot());
        restored.check_invariants().unwrap();
        assert_eq!(restored.stats(), h.machine.stats());
        assert_eq!(restored.last_applied(), h.machine.last_applied());
        assert_eq!(restored.held_by(s), vec![taken[1].id()]);

        let mut restored = Harness { machine: restored, index: h.index };
        assert_eq!(restored.expire(s), 1);
        let next = restored.take(5, SessionId::generate());
        assert_eq!(payloads(&next), vec![b"b".as_slice(), b"c".as_slice()]);
    }
}
