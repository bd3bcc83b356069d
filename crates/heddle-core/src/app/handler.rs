//! TaskHandler - processor が 1 タスクずつ呼び出す処理の定義
//!
//! - `TaskHandler`: 生の bytes payload を受け取る object-safe な trait
//! - `handler_fn`: クロージャをそのまま handler にする
//! - `Handler<T>` + `TypedHandler<T, H>`: JSON payload をデコードしてから渡す（type erasure）

use std::error::Error;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::Task;

/// Whatever a handler wants to report; only its `Display` ends up in the logs.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Processes one task. `Ok` completes it, `Err` leaves it with the session.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError>;
}

pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        (self.f)(task.clone()).await
    }
}

/// Handler over a decoded payload type.
///
/// ```ignore
/// struct Resize;
///
/// #[async_trait]
/// impl Handler<ResizeJob> for Resize {
///     async fn handle(&self, task: Task<ResizeJob>) -> Result<(), HandlerError> {
///         resize(task.payload()).await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, task: Task<T>) -> Result<(), HandlerError>;
}

/// `Handler<T>` を `TaskHandler` として扱うためのアダプタ
///
/// デコードに失敗したタスクは handler の失敗と同じ扱い（complete されない）。
pub struct TypedHandler<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> TaskHandler for TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let typed = task
            .clone()
            .try_map(|bytes| serde_json::from_slice::<T>(&bytes))?;
        self.handler.handle(typed).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde::Deserialize;

    use super::*;
    use crate::domain::TaskId;

    #[derive(Debug, Deserialize)]
    struct Resize {
        width: u32,
    }

    struct SumWidths(Arc<AtomicU32>);

    #[async_trait]
    impl Handler<Resize> for SumWidths {
        async fn handle(&self, task: Task<Resize>) -> Result<(), HandlerError> {
            self.0.fetch_add(task.payload().width, Ordering::SeqCst);
            Ok(())
        }
    }

    fn task(payload: &[u8]) -> Task {
        Task::new(TaskId::new(1, 0), payload.to_vec())
    }

    #[tokio::test]
    async fn closure_handler_sees_payload() {
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        let handler = handler_fn(move |task: Task| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(task.payload().len() as u32, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        });

        handler.handle(&task(b"abc")).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn typed_handler_decodes_json() {
        let total = Arc::new(AtomicU32::new(0));
        let handler = TypedHandler::<Resize, _>::new(SumWidths(Arc::clone(&total)));

        handler.handle(&task(br#"{"width": 640}"#)).await.unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 640);
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_failure() {
        let total = Arc::new(AtomicU32::new(0));
        let handler = TypedHandler::<Resize, _>::new(SumWidths(Arc::clone(&total)));

        assert!(handler.handle(&task(b"not json")).await.is_err());
        assert_eq!(total.load(Ordering::SeqCst), 0);
    }
}
