//! Property tests: the state machine against a plain FIFO model, and replica determinism.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use proptest::prelude::*;
use ulid::Ulid;

use super::{Command, Output, WorkQueueStateMachine};
use crate::domain::{SessionId, TaskId};

const SESSIONS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Add(u8),
    Take { session: usize, max: usize },
    /// Complete the first `count` tasks the session holds, plus a stranger's id.
    Complete { session: usize, count: usize },
    Release { session: usize, count: usize },
    Expire(usize),
    Clear,
    Stats,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..4).prop_map(Op::Add),
        4 => (0..SESSIONS, 1usize..4).prop_map(|(session, max)| Op::Take { session, max }),
        3 => (0..SESSIONS, 0usize..3).prop_map(|(session, count)| Op::Complete { session, count }),
        1 => (0..SESSIONS, 0usize..3).prop_map(|(session, count)| Op::Release { session, count }),
        1 => (0..SESSIONS).prop_map(Op::Expire),
        1 => Just(Op::Clear),
        1 => Just(Op::Stats),
    ]
}

fn session(i: usize) -> SessionId {
    SessionId::from_ulid(Ulid::from_parts(1, i as u128))
}

/// Reference behaviour: tasks keyed by insertion counter, each unassigned or held.
#[derive(Default)]
struct Model {
    next: u64,
    tasks: BTreeMap<u64, Option<usize>>,
    completed: u64,
    cleared: u64,
}

impl Model {
    fn unassigned_prefix(&self, max: usize) -> Vec<u64> {
        self.tasks
            .iter()
            .filter(|(_, holder)| holder.is_none())
            .map(|(counter, _)| *counter)
            .take(max)
            .collect()
    }

    fn count_held(&self) -> usize {
        self.tasks.values().filter(|h| h.is_some()).count()
    }
}

fn counter_of(payload: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(payload);
    u64::from_be_bytes(bytes)
}

/// Turn an op into a command, picking real ids from what the machine says the session holds.
fn to_command(machine: &WorkQueueStateMachine, model: &mut Model, op: &Op) -> Command {
    let pick = |s: usize, count: usize| -> BTreeSet<TaskId> {
        let mut ids: BTreeSet<TaskId> = machine
            .held_by(session(s))
            .into_iter()
            .take(count)
            .collect();
        // never assigned to anyone
        ids.insert(TaskId::new(u64::MAX, 0));
        ids
    };
    match *op {
        Op::Add(n) => Command::Add {
            items: (0..n)
                .map(|_| {
                    let counter = model.next;
                    model.next += 1;
                    counter.to_be_bytes().to_vec()
                })
                .collect(),
        },
        Op::Take { session: s, max } => Command::Take {
            max_items: max,
            session: session(s),
        },
        Op::Complete { session: s, count } => Command::Complete {
            task_ids: pick(s, count),
            session: session(s),
        },
        Op::Release { session: s, count } => Command::Release {
            task_ids: pick(s, count),
            session: session(s),
        },
        Op::Expire(s) => Command::SessionExpired {
            session: session(s),
        },
        Op::Clear => Command::Clear,
        Op::Stats => Command::Stats,
    }
}

fn counters_for(machine: &WorkQueueStateMachine, ids: &BTreeSet<TaskId>) -> Vec<u64> {
    ids.iter()
        .filter_map(|id| machine.record(*id))
        .map(|record| counter_of(&record.payload))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Takes hand out the oldest unassigned tasks; every task is held by at most one
    /// session; counters always add up.
    #[test]
    fn machine_matches_fifo_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut machine = WorkQueueStateMachine::new();
        let mut model = Model::default();

        for (i, op) in ops.iter().enumerate() {
            let index = i as u64 + 1;
            let command = to_command(&machine, &mut model, op);

            // model side effects that need the pre-apply machine (id -> counter)
            let touched = match &command {
                Command::Complete { task_ids, .. } | Command::Release { task_ids, .. } => {
                    counters_for(&machine, task_ids)
                }
                _ => Vec::new(),
            };

            let output = machine.apply(index, command.clone());
            prop_assert!(machine.check_invariants().is_ok(), "{:?}", machine.check_invariants());

            match (&command, output) {
                (Command::Add { items }, Output::Added { count }) => {
                    prop_assert_eq!(count, items.len());
                    for item in items {
                        model.tasks.insert(counter_of(item), None);
                    }
                }
                (Command::Take { max_items, .. }, Output::Taken { tasks }) => {
                    let Op::Take { session: s, .. } = *op else { unreachable!() };
                    let expected = model.unassigned_prefix(*max_items);
                    let got: Vec<u64> = tasks.iter().map(|t| counter_of(t.payload())).collect();
                    prop_assert_eq!(&got, &expected);

                    let ids: HashMap<TaskId, u64> =
                        tasks.iter().map(|t| (t.id(), counter_of(t.payload()))).collect();
                    prop_assert_eq!(ids.len(), tasks.len(), "duplicate ids in one take");
                    for counter in got {
                        model.tasks.insert(counter, Some(s));
                    }
                }
                (Command::Complete { .. }, Output::Completed { count }) => {
                    prop_assert_eq!(count, touched.len());
                    for counter in touched {
                        model.tasks.remove(&counter);
                    }
                    model.completed += count as u64;
                }
                (Command::Release { .. }, Output::Released { count }) => {
                    prop_assert_eq!(count, touched.len());
                    for counter in touched {
                        model.tasks.insert(counter, None);
                    }
                }
                (Command::SessionExpired { .. }, Output::Requeued { count }) => {
                    let Op::Expire(s) = *op else { unreachable!() };
                    let mut requeued = 0;
                    for holder in model.tasks.values_mut() {
                        if *holder == Some(s) {
                            *holder = None;
                            requeued += 1;
                        }
                    }
                    prop_assert_eq!(count, requeued);
                }
                (Command::Clear, Output::Cleared { count }) => {
                    prop_assert_eq!(count, model.tasks.len());
                    model.tasks.clear();
                    model.cleared += count as u64;
                }
                (Command::Stats, Output::Stats { stats }) => {
                    prop_assert_eq!(stats.pending + stats.in_process, model.tasks.len());
                }
                (command, output) => {
                    prop_assert!(false, "{command:?} produced {output:?}");
                }
            }

            let stats = machine.stats();
            prop_assert_eq!(stats.in_process, model.count_held());
            prop_assert_eq!(stats.pending, model.tasks.len() - model.count_held());
            prop_assert_eq!(stats.completed_total, model.completed);
            prop_assert_eq!(
                (stats.pending + stats.in_process) as u64,
                machine.created_total() - model.completed - model.cleared
            );
        }
    }

    /// Two replicas fed the same log end in the same state and produce the same outputs.
    #[test]
    fn replicas_agree(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut a = WorkQueueStateMachine::new();
        let mut b = WorkQueueStateMachine::new();
        let mut model = Model::default();

        for (i, op) in ops.iter().enumerate() {
            let index = i as u64 + 1;
            let command = to_command(&a, &mut model, op);
            let out_a = a.apply(index, command.clone());
            let out_b = b.apply(index, command);
            prop_assert_eq!(out_a, out_b);
        }
        prop_assert_eq!(a.snapshot(), b.snapshot());

        // a replica rebuilt from the snapshot carries on identically
        let mut restored = WorkQueueStateMachine::restore(a.snapshot());
        prop_assert!(restored.check_invariants().is_ok());
        let next = a.last_applied() + 1;
        let next_take = Command::Take { max_items: 8, session: session(0) };
        prop_assert_eq!(a.apply(next, next_take.clone()), restored.apply(next, next_take));
    }
}
