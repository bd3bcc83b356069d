//! heddle-core
//!
//! A work queue kept as a deterministic state machine on top of a replicated log,
//! plus the client that talks to it and the buffer pool the log encodes into.
//!
//! # モジュール構成
//! - **domain**: ids（TaskId, SessionId, Sequence）と Task
//! - **queue**: Command / Output と WorkQueueStateMachine（全レプリカで同じ順に適用される）
//! - **ports**: ReplicatedLog（合意済みログの抽象化）
//! - **impls**: LocalReplicatedLog（単一ノード実装）と EntryCodec
//! - **app**: WorkQueue クライアント、TaskProcessor、TypedWorkQueue、BlockingWorkQueue
//! - **buffer**: BufferPool / PooledBuffer / SharedBuffer
//! - **observability**: QueueStats
//! - **error**: クライアント側のエラー

pub mod app;
pub mod buffer;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use crate::app::{
    BlockingWorkQueue, Handler, HandlerError, TaskHandler, TypedWorkQueue, WorkQueue,
    WorkQueueConfig, handler_fn,
};
pub use crate::domain::{SessionId, Task, TaskId};
pub use crate::error::WorkQueueError;
pub use crate::observability::QueueStats;
