use serde::{Deserialize, Serialize};

use super::TaskId;

/// A task handed to a consumer: id + payload.
///
/// `P` defaults to raw bytes; `TypedWorkQueue` decodes it into a user type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task<P = Vec<u8>> {
    id: TaskId,
    payload: P,
}

impl<P> Task<P> {
    pub fn new(id: TaskId, payload: P) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Keep the id, transform the payload.
    pub fn try_map<Q, E>(self, f: impl FnOnce(P) -> Result<Q, E>) -> Result<Task<Q>, E> {
        Ok(Task {
            id: self.id,
            payload: f(self.payload)?,
        })
    }
}
