//! Per-shard authoritative state.

use crate::msg::{Op, Reply};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// One shard's data plus its per-client dedup table.
///
/// Both maps live behind the same lock so that applying an operation and
/// caching its reply happen as a single step.
#[derive(Debug, Default)]
pub struct ShardState {
    kv: HashMap<String, String>,
    dedup: HashMap<u64, (u64, Reply)>,
}

impl ShardState {
    /// The cached reply for `(client_id, seq)`, if this exact seq was the
    /// last one served for that client.
    pub fn cached(&self, client_id: u64, seq: u64) -> Option<Reply> {
        match self.dedup.get(&client_id) {
            Some((s, reply)) if *s == seq => Some(reply.clone()),
            _ => None,
        }
    }

    /// Record the reply served for `(client_id, seq)`, displacing whatever
    /// was cached for that client before. At most one entry per client.
    pub fn cache(&mut self, client_id: u64, seq: u64, reply: Reply) {
        self.dedup.insert(client_id, (seq, reply));
    }

    pub fn apply(&mut self, op: &Op) -> Reply {
        match op {
            Op::Get { key } => Reply::ok(self.kv.get(key).cloned().unwrap_or_default()),
            Op::Put { key, value } => {
                self.kv.insert(key.clone(), value.clone());
                Reply::ok(value.clone())
            }
            Op::Append { key, value } => {
                let old = self.kv.get(key).cloned().unwrap_or_default();
                self.kv.insert(key.clone(), format!("{}{}", old, value));
                // the pre-append value, not the new one
                Reply::ok(old)
            }
        }
    }
}

/// Shard-granular store. Clones share state; shards are created lazily on
/// first touch and proceed in parallel, with no global lock.
#[derive(Debug, Clone, Default)]
pub struct Store {
    shards: Arc<DashMap<usize, ShardState>>,
}

impl Store {
    /// Run `f` with exclusive access to `shard`'s state.
    pub fn with_shard<T>(&self, shard: usize, f: impl FnOnce(&mut ShardState) -> T) -> T {
        let mut state = self.shards.entry(shard).or_default();
        f(&mut *state)
    }
}
