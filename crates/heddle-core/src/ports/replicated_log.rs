//! ReplicatedLog port - 合意済みログの抽象化
//!
//! 合意アルゴリズム本体（leader election, quorum commit など）は外部。
//! ここでは「順序付きで commit され、各レプリカの state machine に同じ順で適用される」
//! という契約だけを定義する。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

use crate::buffer::BufferError;
use crate::domain::SessionId;
use crate::queue::{Command, Output};

/// A command after commit and application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub index: u64,
    pub output: Output,
}

#[derive(Debug, Error)]
pub enum LogError {
    /// The session's lease lapsed; commands bearing it are no longer accepted.
    #[error("session expired: {0}")]
    SessionExpired(SessionId),

    #[error("replicated log is closed")]
    Closed,

    /// The command was refused before being appended.
    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// The state machine answered with a result of the wrong kind.
    #[error("unexpected output for {operation}: {output:?}")]
    UnexpectedOutput {
        operation: &'static str,
        output: Output,
    },
}

/// Ordered, durable command log shared by all replicas of a partition.
///
/// # Contract
/// - `submit` resolves after the command is committed and applied, with the state machine's output.
/// - Results are delivered in commit order; every replica observes the same sequence.
/// - `expire_session` is the liveness service's notification, delivered once per expiry.
///   Afterwards commands bearing that session are rejected with `SessionExpired`.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    async fn submit(&self, command: Command) -> Result<Committed, LogError>;

    async fn expire_session(&self, session: SessionId) -> Result<Committed, LogError>;

    /// Wakeup hint fired when committed work becomes available.
    fn task_available(&self) -> Arc<Notify>;
}
