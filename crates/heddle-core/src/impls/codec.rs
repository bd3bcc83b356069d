//! EntryCodec - ログエントリ / スナップショットを pooled buffer に JSON で書く
//!
//! バッファが足りなければ容量を倍にして取り直す（小さい方は pool に戻る）。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::ports::LogError;

#[derive(Clone)]
pub struct EntryCodec {
    pool: BufferPool,
    initial_capacity: usize,
}

impl EntryCodec {
    pub fn new(pool: BufferPool, initial_capacity: usize) -> Self {
        Self {
            pool,
            initial_capacity,
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Serialize `value`; the returned buffer's position marks the end of the encoding.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<PooledBuffer, LogError> {
        let mut capacity = self.initial_capacity;
        loop {
            let mut buffer = self.pool.acquire(capacity);
            match serde_json::to_writer(&mut buffer, value) {
                Ok(()) => return Ok(buffer),
                // short write: buffer too small
                Err(e) if e.is_io() => {
                    capacity = buffer.capacity().saturating_mul(2);
                    self.pool.release(buffer);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, LogError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
