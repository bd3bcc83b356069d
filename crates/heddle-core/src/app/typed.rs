//! TypedWorkQueue - payload を serde で T とやり取りする WorkQueue のラッパー
//!
//! wire 上の payload は JSON bytes。state machine は中身を見ない。

use std::borrow::Borrow;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tracing::warn;

use super::client::WorkQueue;
use super::handler::{Handler, TypedHandler};
use crate::domain::{Task, TaskId};
use crate::error::WorkQueueError;
use crate::observability::QueueStats;

/// Payload types a [`TypedWorkQueue`] can carry.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

pub struct TypedWorkQueue<T> {
    queue: WorkQueue,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedWorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Payload> TypedWorkQueue<T> {
    pub fn new(queue: WorkQueue) -> Self {
        Self {
            queue,
            _marker: PhantomData,
        }
    }

    /// The untyped client underneath (same session).
    pub fn raw(&self) -> &WorkQueue {
        &self.queue
    }

    pub async fn add_one(&self, item: &T) -> Result<(), WorkQueueError> {
        self.queue.add_one(serde_json::to_vec(item)?).await
    }

    pub async fn add_multiple<I>(&self, items: I) -> Result<(), WorkQueueError>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let encoded = items
            .into_iter()
            .map(|item| serde_json::to_vec(item.borrow()))
            .collect::<Result<Vec<_>, _>>()?;
        self.queue.add_multiple(encoded).await
    }

    /// Take and decode. If any payload fails to decode, the whole batch is
    /// released again and the decode error returned.
    pub async fn take(&self, max_items: usize) -> Result<Vec<Task<T>>, WorkQueueError> {
        let tasks = self.queue.take(max_items).await?;
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id()).collect();

        let decoded = tasks
            .into_iter()
            .map(|task| task.try_map(|bytes| serde_json::from_slice::<T>(&bytes)))
            .collect::<Result<Vec<_>, _>>();
        match decoded {
            Ok(tasks) => Ok(tasks),
            Err(err) => {
                warn!(error = %err, count = ids.len(), "undecodable payload; releasing batch");
                self.queue.release(ids).await?;
                Err(err.into())
            }
        }
    }

    pub async fn take_one(&self) -> Result<Option<Task<T>>, WorkQueueError> {
        Ok(self.take(1).await?.into_iter().next())
    }

    pub async fn complete<I>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.queue.complete(task_ids).await
    }

    pub async fn release<I>(&self, task_ids: I) -> Result<usize, WorkQueueError>
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.queue.release(task_ids).await
    }

    pub async fn stats(&self) -> Result<QueueStats, WorkQueueError> {
        self.queue.stats().await
    }

    pub async fn register_task_processor<H>(
        &self,
        handler: H,
        parallelism: usize,
        executor: Handle,
    ) -> Result<(), WorkQueueError>
    where
        H: Handler<T> + 'static,
    {
        let handler = Arc::new(TypedHandler::<T, H>::new(handler));
        self.queue
            .register_task_processor(handler, parallelism, executor)
            .await
    }

    pub async fn stop_processing(&self) -> Result<(), WorkQueueError> {
        self.queue.stop_processing().await
    }

    pub async fn close(&self) -> Result<(), WorkQueueError> {
        self.queue.close().await
    }
}
