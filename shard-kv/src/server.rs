//! Server side.

use crate::kv::Store;
use crate::msg::{Reply, Request};
use crate::shard::{primary_for_shard, shard_for_key};
use crate::Config;
use std::sync::Arc;
use tracing::{debug, trace};

/// One server instance in the cluster.
///
/// The server is the primary for the shard matching its index. Requests for
/// other shards are forwarded synchronously through the config's handle table
/// when a handle is registered; with no handle the server answers
/// `ErrWrongGroup` and the clerk moves on.
#[derive(Debug)]
pub struct KvServer {
    cfg: Arc<Config>,
    my_index: usize,
    store: Store,
}

impl KvServer {
    pub fn new(cfg: Arc<Config>, my_index: usize) -> Self {
        KvServer {
            cfg,
            my_index,
            store: Store::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.my_index
    }

    fn is_primary(&self, shard: usize) -> bool {
        self.my_index == primary_for_shard(shard)
    }

    /// Handle one request to completion.
    ///
    /// A forwarded request returns the primary's reply verbatim, so the
    /// primary's dedup decision survives the hop. On the primary, the dedup
    /// check, the apply, and the reply-cache write happen under the shard
    /// lock as one step; a retried seq gets its cached reply back without
    /// touching the data.
    pub fn call(&self, req: &Request) -> Reply {
        let shard = shard_for_key(req.op.key(), self.cfg.nservers);
        trace!(
            shard,
            client_id = req.client_id,
            seq = req.seq,
            op = ?req.op,
            "request"
        );

        if !self.is_primary(shard) {
            let primary = primary_for_shard(shard);
            if let Some(srv) = self.cfg.handle(primary) {
                debug!(shard, from = self.my_index, to = primary, "forwarding");
                return srv.call(req);
            }
            debug!(shard, idx = self.my_index, "not primary, no handle");
            return Reply::wrong_group();
        }

        self.store.with_shard(shard, |state| {
            if let Some(cached) = state.cached(req.client_id, req.seq) {
                debug!(client_id = req.client_id, seq = req.seq, "dedup hit");
                return cached;
            }
            let reply = state.apply(&req.op);
            state.cache(req.client_id, req.seq, reply.clone());
            trace!(client_id = req.client_id, seq = req.seq, value = %reply.value, "applied");
            reply
        })
    }
}

/// Construct every server in `cfg`'s cluster and populate the handle table,
/// so any server can forward to any primary in-process.
pub fn make_cluster(cfg: Arc<Config>) -> Vec<Arc<KvServer>> {
    (0..cfg.nservers)
        .map(|i| {
            let srv = Arc::new(KvServer::new(Arc::clone(&cfg), i));
            cfg.register(i, Arc::clone(&srv));
            srv
        })
        .collect()
}
