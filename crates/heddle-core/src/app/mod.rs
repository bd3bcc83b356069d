//! App - クライアント側
//!
//! # 主要コンポーネント
//! - **WorkQueue**: 1 session 分のクライアント（add / take / complete / release / clear / stats）
//! - **TaskProcessor**: take → handle → complete のバックグラウンドループ
//! - **TypedWorkQueue**: serde で payload を型付けするラッパー
//! - **BlockingWorkQueue**: runtime の Handle で待つ同期版

pub mod blocking;
pub mod client;
pub mod config;
pub mod handler;
mod processor;
pub mod typed;

pub use self::blocking::BlockingWorkQueue;
pub use self::client::WorkQueue;
pub use self::config::{IdleBackoff, WorkQueueConfig};
pub use self::handler::{FnHandler, Handler, HandlerError, TaskHandler, TypedHandler, handler_fn};
pub use self::typed::{Payload, TypedWorkQueue};
