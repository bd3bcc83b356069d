//! TaskProcessor - take → handle → complete を回すバックグラウンドループ
//!
//! - 空きスロット（Semaphore の permit）がある分だけ take する。in-flight は常に parallelism 以下
//! - handler は指定された executor 上で実行し、成功したら complete する
//! - 失敗 / panic したタスクは complete しない（`release_on_failure` なら release する）
//! - キューが空のときは backoff しつつ、新しいタスクの通知で早めに起きる
//! - `shutdown_tx` に true を送ると新規の take をやめ、in-flight の完了を待って抜ける

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::WorkQueue;
use super::handler::TaskHandler;
use crate::domain::{Task, TaskId};
use crate::error::WorkQueueError;
use crate::ports::LogError;

pub(crate) struct TaskProcessor {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskProcessor {
    pub(crate) fn spawn(
        queue: WorkQueue,
        handler: Arc<dyn TaskHandler>,
        parallelism: usize,
        executor: Handle,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(processor_loop(
            queue,
            handler,
            parallelism,
            executor,
            shutdown_rx,
        ));
        Self { shutdown_tx, join }
    }

    /// The loop exited on its own (session lost, log closed).
    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub(crate) async fn shutdown_and_join(self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "task processor loop aborted");
        }
    }
}

async fn processor_loop(
    queue: WorkQueue,
    handler: Arc<dyn TaskHandler>,
    parallelism: usize,
    executor: Handle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let slots = Arc::new(Semaphore::new(parallelism));
    let task_available = queue.log().task_available();
    let backoff = queue.config().idle_backoff.clone();
    let batch = queue.config().take_batch.max(1);
    let mut idle_rounds: u32 = 0;

    info!(session = %queue.session(), parallelism, "task processor started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 空きスロットができるまで待つ（shutdown と競合させる）
        let first = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let mut permits = vec![first];
        while permits.len() < batch {
            match Arc::clone(&slots).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }

        // take より前に登録しておき、take 中に入った通知も取りこぼさない
        let notified = task_available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let tasks = match queue.take(permits.len()).await {
            Ok(tasks) => tasks,
            Err(WorkQueueError::SessionExpired(session)) => {
                warn!(%session, "session expired; task processor stopping");
                break;
            }
            Err(WorkQueueError::Log(LogError::Closed)) => {
                warn!("replicated log closed; task processor stopping");
                break;
            }
            Err(err) => {
                warn!(error = %err, "take failed");
                Vec::new()
            }
        };

        if tasks.is_empty() {
            drop(permits);
            let delay = backoff.next_delay(idle_rounds);
            idle_rounds = idle_rounds.saturating_add(1);
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut notified => {}
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        }
        idle_rounds = 0;

        debug!(count = tasks.len(), "tasks taken");
        // 取れた数より多い permit はここで返る
        for (task, permit) in tasks.into_iter().zip(permits) {
            dispatch(&queue, &handler, &executor, task, permit);
        }
    }

    // in-flight の handler と complete が終わるまで待つ
    if let Ok(drained) = slots.acquire_many(parallelism as u32).await {
        drop(drained);
    }
    info!(session = %queue.session(), "task processor drained");
}

/// Run one task while holding its slot.
fn dispatch(
    queue: &WorkQueue,
    handler: &Arc<dyn TaskHandler>,
    executor: &Handle,
    task: Task,
    permit: OwnedSemaphorePermit,
) {
    let queue = queue.clone();
    let handler = Arc::clone(handler);
    let executor = executor.clone();

    tokio::spawn(async move {
        let _permit = permit;
        let id = task.id();
        let run = executor.spawn(async move { handler.handle(&task).await });

        match run.await {
            Ok(Ok(())) => match queue.complete([id]).await {
                Ok(1) => debug!(task = %id, "task completed"),
                Ok(_) => warn!(task = %id, "task was no longer held when completing"),
                Err(err) => warn!(task = %id, error = %err, "complete failed"),
            },
            Ok(Err(err)) => {
                warn!(task = %id, error = %err, "task handler failed");
                after_failure(&queue, id).await;
            }
            Err(join) => {
                warn!(task = %id, panicked = join.is_panic(), "task handler aborted");
                after_failure(&queue, id).await;
            }
        }
    });
}

async fn after_failure(queue: &WorkQueue, id: TaskId) {
    if !queue.config().release_on_failure {
        // stays with this session until it expires
        return;
    }
    if let Err(err) = queue.release([id]).await {
        warn!(task = %id, error = %err, "release after failure failed");
    }
}
