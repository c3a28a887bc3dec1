//! Sharded, replica-aware key-value store.
//!
//! Keys are partitioned across shards by a deterministic function of the key
//! ([`shard::shard_for_key`]); each shard has a static primary server which
//! owns its authoritative state. [`Clerk`] routes each request to the shard's
//! primary and walks the replica ring on transport or routing errors;
//! [`KvServer`] deduplicates retried requests per client, so a mutation
//! applies at most once no matter how often the transport redelivers it.

use color_eyre::eyre::Report;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

pub mod chan;
pub mod client;
pub mod kv;
pub mod msg;
pub mod server;
pub mod shard;
pub mod udp;

pub use client::Clerk;
pub use msg::{Op, Reply, Request};
pub use server::KvServer;

/// A client's handle to one server: issue a request, await its reply.
///
/// An `Err` from `call` is a transport failure (lost datagram, dead peer); the
/// request may or may not have reached the server. Callers that retry must
/// reuse the same `seq` so the server can recognize the duplicate.
pub trait Endpoint {
    fn call(
        &self,
        req: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>>;
}

impl<E: Endpoint + ?Sized> Endpoint for Box<E> {
    fn call(
        &self,
        req: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>> {
        (**self).call(req)
    }
}

impl<E: Endpoint + ?Sized> Endpoint for Arc<E> {
    fn call(
        &self,
        req: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>> {
        (**self).call(req)
    }
}

/// Cluster configuration.
///
/// `nservers` is both the shard count and the server count; the primary for
/// shard `s` is server `s`. `nreplicas` is the fan-out a [`Clerk`] sweeps per
/// retry pass. The handle table enables in-process forwarding from a replica
/// to the shard's primary; servers are registered after construction, and an
/// unpopulated table means non-primaries answer `ErrWrongGroup` instead.
pub struct Config {
    pub nservers: usize,
    pub nreplicas: usize,
    handles: RwLock<Vec<Option<Arc<KvServer>>>>,
}

impl Config {
    pub fn new(nservers: usize) -> Self {
        Config {
            nservers,
            nreplicas: 1,
            handles: RwLock::new(vec![None; nservers]),
        }
    }

    pub fn replicas(mut self, nreplicas: usize) -> Self {
        self.nreplicas = nreplicas;
        self
    }

    /// Make `srv` reachable for in-process forwarding.
    pub fn register(&self, idx: usize, srv: Arc<KvServer>) {
        self.handles.write().unwrap()[idx] = Some(srv);
    }

    pub(crate) fn handle(&self, idx: usize) -> Option<Arc<KvServer>> {
        self.handles.read().unwrap().get(idx).cloned().flatten()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("nservers", &self.nservers)
            .field("nreplicas", &self.nreplicas)
            .finish()
    }
}
