//! WorkQueue - replicated work queue のクライアント
//!
//! 1 インスタンス = 1 session。各操作は Command にして ReplicatedLog に submit し、
//! commit 後の Output を呼び出し側の型に戻す。
//!
//! # 方針
//! - 引数の検証はここで行い、不正なものは log に出さない
//! - commit 待ちには `operation_timeout` の上限がある。タイムアウトは「結果不明」
//!   （コマンド自体は後で commit されうる）
//! - 呼び出し側の future を drop しても submit 自体はキャンセルされない

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::blocking::BlockingWorkQueue;
use super::config::WorkQueueConfig;
use super::handler::TaskHandler;
use super::processor::TaskProcessor;
use crate::domain::{SessionId, Task, TaskId};
use crate::error::WorkQueueError;
use crate::observability::QueueStats;
use crate::ports::{Committed, LogError, ReplicatedLog};
use crate::queue::{Command, Output};

#[derive(Clone)]
pub struct WorkQueue {
    log: Arc<dyn ReplicatedLog>,
    session: SessionId,
    config: Arc<WorkQueueConfig>,
    processor: Arc<Mutex<Option<TaskProcessor>>>,
}

impl WorkQueue {
    /// Client with a freshly generated session.
    pub fn new(log: Arc<dyn ReplicatedLog>, config: WorkQueueConfig) -> Self {
        Self::with_session(log, SessionId::generate(), config)
    }

    pub fn with_session(
        log: Arc<dyn ReplicatedLog>,
        session: SessionId,
        config: WorkQueueConfig,
    ) -> Self {
        Self {
            log,
            session,
            config: Arc::new(config),
            processor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn config(&self) -> &WorkQueueConfig {
        &self.config
    }

    pub(crate) fn log(&self) -> &Arc<dyn ReplicatedLog> {
        &self.log
    }

    /// Same session and log, without the processor slot.
    pub(crate) fn detached(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            session: self.session,
            config: Arc::clone(&self.config),
            processor: Arc::new(Mutex::new(None)),
        }
    }

    /// Append tasks in the given order. An empty batch submits nothing.
    pub async fn add_multiple<I>(&self, items: I) -> Result<(), WorkQueueError>
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        let items: Vec<Vec<u8>> = items.into_iter().map(Into::into).collect();
        if items.is_empty() {
            return Ok(());
        }
        let expected = items.len();
        match self.submit("add", Command::Add { items }).await? {
            Output::Added { count } => {
                debug!(count, "tasks added");
                debug_assert_eq!(count, expected);
                Ok(())
            }
            other => Err(unexpected("add", other)),
        }
    }

    pub async fn add_one(&self, item: impl Into<Vec<u8>>) -> Result<(), WorkQueueError> {
        self.add_multiple([item.into()]).await
    }

    /// Up to `max_items` of the oldest unassigned tasks, now held by this session.
    pub async fn take(&self, max_items: usize) -> Result<Vec<Task>, WorkQueueError> {
        let command = Command::Take {
            max_items,
            session: self.session,
        };
        command.validate().map_err(WorkQueueError::InvalidArgument)?;
        match self.submit("take", command).await? {
            Output::Taken { tasks } => Ok(tasks),
            other => Err(unexpected("take", other)),
        }
    }

    pub async fn take_one(&self) -> Result<Option<Task>, WorkQueueError> {
        Ok(self.take(1).await?.into_iter().next())
    }

    /// Finish tasks held by this session. Returns how many were actually removed;
    /// ids not held here are ignored.
    pub async fn complete<I>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = TaskId>,
    {
        let task_ids = non_empty("complete", task_ids)?;
        let command = Command::Complete {
            task_ids,
            session: self.session,
        };
        match self.submit("complete", command).await? {
            Output::Completed { count } => Ok(count),
            other => Err(unexpected("complete", other)),
        }
    }

    /// [`complete`](Self::complete) with ids in their `task-<index>-<slot>` form.
    pub async fn complete_str<I, S>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = task_ids
            .into_iter()
            .map(|s| s.as_ref().parse::<TaskId>())
            .collect::<Result<Vec<_>, _>>()?;
        self.complete(ids).await
    }

    /// Give held tasks back without completing them. They keep their place in line.
    pub async fn release<I>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = TaskId>,
    {
        let task_ids = non_empty("release", task_ids)?;
        let command = Command::Release {
            task_ids,
            session: self.session,
        };
        match self.submit("release", command).await? {
            Output::Released { count } => Ok(count),
            other => Err(unexpected("release", other)),
        }
    }

    /// Drop every task in the queue, assigned or not.
    pub async fn clear(&self) -> Result<usize, WorkQueueError> {
        match self.submit("clear", Command::Clear).await? {
            Output::Cleared { count } => Ok(count),
            other => Err(unexpected("clear", other)),
        }
    }

    /// Linearizable counters (goes through the log).
    pub async fn stats(&self) -> Result<QueueStats, WorkQueueError> {
        match self.submit("stats", Command::Stats).await? {
            Output::Stats { stats } => Ok(stats),
            other => Err(unexpected("stats", other)),
        }
    }

    /// Start a background loop that takes tasks and runs `handler` on `executor`,
    /// with at most `parallelism` handlers in flight.
    pub async fn register_task_processor(
        &self,
        handler: Arc<dyn TaskHandler>,
        parallelism: usize,
        executor: Handle,
    ) -> Result<(), WorkQueueError> {
        let max = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
        if parallelism == 0 || parallelism > max {
            return Err(WorkQueueError::InvalidArgument(format!(
                "parallelism must be in 1..={max}, got {parallelism}"
            )));
        }

        let mut slot = self.processor.lock().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.is_finished() {
                return Err(WorkQueueError::AlreadyProcessing);
            }
            debug!("replacing a processor that already stopped");
        }
        *slot = Some(TaskProcessor::spawn(
            self.detached(),
            handler,
            parallelism,
            executor,
        ));
        info!(session = %self.session, parallelism, "task processor registered");
        Ok(())
    }

    /// Stop taking new tasks and wait until in-flight handlers have finished
    /// and their completions were submitted. No-op without a processor.
    pub async fn stop_processing(&self) -> Result<(), WorkQueueError> {
        // held across the join so concurrent callers also wait for quiescence
        let mut slot = self.processor.lock().await;
        if let Some(processor) = slot.take() {
            processor.shutdown_and_join().await;
            info!(session = %self.session, "task processor stopped");
        }
        Ok(())
    }

    /// Stop processing and end the session; anything still held goes back to the queue.
    pub async fn close(&self) -> Result<(), WorkQueueError> {
        self.stop_processing().await?;
        let log = Arc::clone(&self.log);
        let session = self.session;
        match self
            .committed("close", async move { log.expire_session(session).await })
            .await
        {
            Ok(committed) => {
                info!(session = %self.session, output = ?committed.output, "session closed");
                Ok(())
            }
            // already gone
            Err(WorkQueueError::SessionExpired(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Same session and processor, different bound on waiting for commits.
    pub fn with_operation_timeout(&self, timeout: Duration) -> Self {
        let config = WorkQueueConfig {
            operation_timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ..WorkQueueConfig::clone(&self.config)
        };
        Self {
            config: Arc::new(config),
            ..self.clone()
        }
    }

    /// Blocking handle driven on `runtime`, using this client's operation timeout.
    pub fn blocking(&self, runtime: Handle) -> BlockingWorkQueue {
        BlockingWorkQueue::new(self.clone(), runtime)
    }

    /// Blocking handle with its own operation timeout.
    pub fn blocking_with_timeout(&self, runtime: Handle, timeout: Duration) -> BlockingWorkQueue {
        BlockingWorkQueue::new(self.with_operation_timeout(timeout), runtime)
    }

    async fn submit(
        &self,
        operation: &'static str,
        command: Command,
    ) -> Result<Output, WorkQueueError> {
        let log = Arc::clone(&self.log);
        let committed = self
            .committed(operation, async move { log.submit(command).await })
            .await?;
        Ok(committed.output)
    }

    /// Wait for a log call, bounded by the operation timeout.
    ///
    /// The call runs in its own task: timing out or dropping the caller
    /// only stops the wait.
    async fn committed<F>(
        &self,
        operation: &'static str,
        pending: F,
    ) -> Result<Committed, WorkQueueError>
    where
        F: Future<Output = Result<Committed, LogError>> + Send + 'static,
    {
        let pending = tokio::spawn(pending);

        let after = self.config.operation_timeout();
        match tokio::time::timeout(after, pending).await {
            Ok(Ok(Ok(committed))) => Ok(committed),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Err(join)) => Err(WorkQueueError::Aborted(join.to_string())),
            Err(_) => {
                warn!(operation, ?after, "no commit before timeout");
                Err(WorkQueueError::Timeout { operation, after })
            }
        }
    }
}

fn non_empty<I>(operation: &str, task_ids: I) -> Result<BTreeSet<TaskId>, WorkQueueError>
where
    I: IntoIterator<Item = TaskId>,
{
    let task_ids: BTreeSet<TaskId> = task_ids.into_iter().collect();
    if task_ids.is_empty() {
        return Err(WorkQueueError::InvalidArgument(format!(
            "{operation}: task_ids must not be empty"
        )));
    }
    Ok(task_ids)
}

fn unexpected(operation: &'static str, output: Output) -> WorkQueueError {
    WorkQueueError::Log(LogError::UnexpectedOutput { operation, output })
}
