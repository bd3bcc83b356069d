//! Buffer pool for the log / snapshot I/O path.
//!
//! ログエントリとスナップショットのシリアライズ用に、固定容量のバッファを再利用する。
//!
//! - `BufferPool::acquire` が唯一の払い出し口
//! - `BufferPool::release`（または `PooledBuffer` の drop）が唯一の回収口
//! - `PooledBuffer` は move-only なので二重 release は型で表現できない
//! - 読み取り共有は `SharedBuffer`（参照カウント）。最後の参照が drop された時点で回収される

mod pool;
mod shared;

pub use pool::{BufferPool, BufferPoolConfig, PoolStats, PooledBuffer};
pub use shared::SharedBuffer;

use thiserror::Error;

/// Cursor errors. A buffer never grows on its own; callers acquire a larger one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer overflow: needed {needed} bytes, {remaining} remaining")]
    Overflow { needed: usize, remaining: usize },

    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    #[error("invalid cursor: position={position} limit={limit} capacity={capacity}")]
    InvalidCursor {
        position: usize,
        limit: usize,
        capacity: usize,
    },
}
