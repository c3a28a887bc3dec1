//! Request and reply envelopes.

use serde::{Deserialize, Serialize};

/// The recipient is not the shard's primary and could not forward.
pub const ERR_WRONG_GROUP: &str = "ErrWrongGroup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Get { key: String },
    Put { key: String, value: String },
    Append { key: String, value: String },
}

impl Op {
    pub fn key(&self) -> &str {
        match self {
            Op::Get { key } | Op::Put { key, .. } | Op::Append { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub op: Op,
    /// Stable identity of the issuing clerk.
    pub client_id: u64,
    /// Monotonic per-clerk sequence number; identical across retries of one
    /// logical call.
    pub seq: u64,
}

/// `err == ""` is success. The server only ever emits [`ERR_WRONG_GROUP`],
/// but clerks treat any non-empty tag as "try the next replica", so this
/// stays an open string rather than a closed enum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub value: String,
    pub err: String,
}

impl Reply {
    pub fn ok(value: impl Into<String>) -> Self {
        Reply {
            value: value.into(),
            err: String::new(),
        }
    }

    pub fn wrong_group() -> Self {
        Reply {
            value: String::new(),
            err: ERR_WRONG_GROUP.to_owned(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}
