//! BlockingWorkQueue - async を使わない呼び出し側向けの WorkQueue
//!
//! 各メソッドは渡された runtime の `Handle::block_on` で async 版を待つだけ。
//! timeout は元の WorkQueue と同じ `operation_timeout`（handle ごとに上書き可）。
//!
//! # 注意
//! - async context の中から呼ぶと `block_on` が panic する
//! - submit は別タスクで走るので、runtime は multi-thread であること

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use super::client::WorkQueue;
use super::handler::TaskHandler;
use crate::domain::{SessionId, Task, TaskId};
use crate::error::WorkQueueError;
use crate::observability::QueueStats;

/// Synchronous view of a [`WorkQueue`]; same session, same processor slot.
#[derive(Clone)]
pub struct BlockingWorkQueue {
    queue: WorkQueue,
    runtime: Handle,
}

impl BlockingWorkQueue {
    pub(crate) fn new(queue: WorkQueue, runtime: Handle) -> Self {
        Self { queue, runtime }
    }

    pub fn session(&self) -> SessionId {
        self.queue.session()
    }

    /// Bound on waiting for each commit.
    pub fn operation_timeout(&self) -> Duration {
        self.queue.config().operation_timeout()
    }

    /// The async client this handle drives.
    pub fn as_async(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn add_multiple<I>(&self, items: I) -> Result<(), WorkQueueError>
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        self.runtime.block_on(self.queue.add_multiple(items))
    }

    pub fn add_one(&self, item: impl Into<Vec<u8>>) -> Result<(), WorkQueueError> {
        self.runtime.block_on(self.queue.add_one(item))
    }

    pub fn take(&self, max_items: usize) -> Result<Vec<Task>, WorkQueueError> {
        self.runtime.block_on(self.queue.take(max_items))
    }

    pub fn take_one(&self) -> Result<Option<Task>, WorkQueueError> {
        self.runtime.block_on(self.queue.take_one())
    }

    pub fn complete<I>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.runtime.block_on(self.queue.complete(task_ids))
    }

    pub fn complete_str<I, S>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runtime.block_on(self.queue.complete_str(task_ids))
    }

    pub fn release<I>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.runtime.block_on(self.queue.release(task_ids))
    }

    pub fn clear(&self) -> Result<usize, WorkQueueError> {
        self.runtime.block_on(self.queue.clear())
    }

    pub fn stats(&self) -> Result<QueueStats, WorkQueueError> {
        self.runtime.block_on(self.queue.stats())
    }

    /// Handlers run on `executor`; the processor loop itself lives on this handle's runtime.
    pub fn register_task_processor(
        &self,
        handler: Arc<dyn TaskHandler>,
        parallelism: usize,
        executor: Handle,
    ) -> Result<(), WorkQueueError> {
        self.runtime
            .block_on(self.queue.register_task_processor(handler, parallelism, executor))
    }

    pub fn stop_processing(&self) -> Result<(), WorkQueueError> {
        self.runtime.block_on(self.queue.stop_processing())
    }

    pub fn close(&self) -> Result<(), WorkQueueError> {
        self.runtime.block_on(self.queue.close())
    }
}
