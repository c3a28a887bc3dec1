//! Client side.

use crate::msg::{Op, Request};
use crate::shard::shard_for_key;
use crate::{Config, Endpoint};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Pause between fruitless sweeps over the replica ring, so an unreachable
/// cluster does not turn the retry loop into a busy spin.
const SWEEP_PAUSE: Duration = Duration::from_millis(10);

/// Client-side stub.
///
/// A `Clerk` owns a stable 62-bit random identity and hands out one sequence
/// number per logical call; every retry of that call reuses the same seq, so
/// the server recognizes redelivered requests and applies each mutation at
/// most once. Operations never fail: the clerk sweeps `nreplicas` candidate
/// servers starting at the shard's primary, wrapping around forever until
/// some server answers without error. Safe to share across tasks.
pub struct Clerk<C> {
    endpoints: Vec<C>,
    nservers: usize,
    nreplicas: usize,
    client_id: u64,
    seq: AtomicU64,
}

impl<C: Endpoint> Clerk<C> {
    pub fn new(endpoints: Vec<C>, cfg: &Config) -> Self {
        Clerk {
            nservers: cfg.nservers,
            nreplicas: cfg.nreplicas,
            endpoints,
            client_id: rand::thread_rng().gen::<u64>() >> 2,
            seq: AtomicU64::new(0),
        }
    }

    /// The stored value for `key`, or `""` if absent.
    pub async fn get(&self, key: impl Into<String>) -> String {
        self.issue(Op::Get { key: key.into() }).await
    }

    /// Store `value` under `key`, overwriting any previous value.
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.issue(Op::Put {
            key: key.into(),
            value: value.into(),
        })
        .await;
    }

    /// Append `value` to `key`'s value and return the value from before the
    /// append (`""` if the key was absent).
    pub async fn append(&self, key: impl Into<String>, value: impl Into<String>) -> String {
        self.issue(Op::Append {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    async fn issue(&self, op: Op) -> String {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let shard = shard_for_key(op.key(), self.nservers);
        let req = Request {
            op,
            client_id: self.client_id,
            seq,
        };

        loop {
            for r in 0..self.nreplicas {
                let idx = (shard + r) % self.endpoints.len();
                match self.endpoints[idx].call(req.clone()).await {
                    Ok(reply) if reply.is_ok() => {
                        trace!(seq, idx, "reply");
                        return reply.value;
                    }
                    Ok(reply) => {
                        trace!(seq, idx, err = %reply.err, "server error, next replica")
                    }
                    Err(err) => {
                        trace!(seq, idx, err = ?err, "transport error, next replica")
                    }
                }
            }
            tokio::time::sleep(SWEEP_PAUSE).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::Clerk;
    use crate::chan::{serve_chan, ChanEndpoint};
    use crate::msg::{Reply, Request};
    use crate::server::make_cluster;
    use crate::{Config, Endpoint};
    use color_eyre::eyre::{eyre, Report};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_error::ErrorLayer;
    use tracing_futures::Instrument;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    fn init_tracing() -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .with(ErrorLayer::default());
        let guard = subscriber.set_default();
        color_eyre::install().unwrap_or_else(|_| ());
        guard
    }

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    /// Delivers the request, then throws the reply away `drops` times.
    struct LossyEnd {
        inner: ChanEndpoint,
        drops: Arc<AtomicUsize>,
    }

    impl Endpoint for LossyEnd {
        fn call(
            &self,
            req: Request,
        ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>> {
            let fut = self.inner.call(req);
            let drops = Arc::clone(&self.drops);
            Box::pin(async move {
                let reply = fut.await?;
                if drops.load(Ordering::SeqCst) > 0 {
                    drops.fetch_sub(1, Ordering::SeqCst);
                    return Err(eyre!("dropped reply"));
                }
                Ok(reply)
            })
        }
    }

    /// Fails before the request is sent, `failures` times.
    struct FlakyEnd {
        inner: ChanEndpoint,
        failures: Arc<AtomicUsize>,
    }

    impl Endpoint for FlakyEnd {
        fn call(
            &self,
            req: Request,
        ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Box::pin(async { Err(eyre!("unreachable")) });
            }
            self.inner.call(req)
        }
    }

    /// Never delivers anything.
    struct DeadEnd;

    impl Endpoint for DeadEnd {
        fn call(
            &self,
            _req: Request,
        ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>> {
            Box::pin(async { Err(eyre!("unreachable")) })
        }
    }

    #[test]
    fn basic_put_get() {
        let _guard = init_tracing();
        rt().block_on(
            async move {
                let cfg = Arc::new(Config::new(1));
                let servers = make_cluster(Arc::clone(&cfg));
                let ends = vec![serve_chan(Arc::clone(&servers[0]))];
                let clerk = Clerk::new(ends, &cfg);

                clerk.put("0", "hello").await;
                assert_eq!(clerk.get("0").await, "hello");
            }
            .instrument(tracing::info_span!("basic_put_get")),
        );
    }

    #[test]
    fn append_returns_old() {
        let _guard = init_tracing();
        rt().block_on(
            async move {
                let cfg = Arc::new(Config::new(1));
                let servers = make_cluster(Arc::clone(&cfg));
                let ends = vec![serve_chan(Arc::clone(&servers[0]))];
                let clerk = Clerk::new(ends, &cfg);

                clerk.put("0", "a").await;
                assert_eq!(clerk.append("0", "b").await, "a");
                assert_eq!(clerk.get("0").await, "ab");
            }
            .instrument(tracing::info_span!("append_returns_old")),
        );
    }

    #[test]
    fn append_log_reconstruction() {
        let _guard = init_tracing();
        rt().block_on(
            async move {
                let cfg = Arc::new(Config::new(2));
                let servers = make_cluster(Arc::clone(&cfg));
                let ends: Vec<_> = servers
                    .iter()
                    .map(|s| serve_chan(Arc::clone(s)))
                    .collect();
                let clerk = Clerk::new(ends, &cfg);

                let mut log = String::new();
                for suffix in ["a", "b", "c", "d"] {
                    assert_eq!(clerk.append("5", suffix).await, log);
                    log.push_str(suffix);
                }
                assert_eq!(clerk.get("5").await, "abcd");
            }
            .instrument(tracing::info_span!("append_log_reconstruction")),
        );
    }

    #[test]
    fn dropped_reply_is_not_applied_twice() {
        let _guard = init_tracing();
        rt().block_on(
            async move {
                let cfg = Arc::new(Config::new(1));
                let servers = make_cluster(Arc::clone(&cfg));
                let ends = vec![LossyEnd {
                    inner: serve_chan(Arc::clone(&servers[0])),
                    drops: Arc::new(AtomicUsize::new(1)),
                }];
                let clerk = Clerk::new(ends, &cfg);

                // the first reply is lost, the clerk retries with the same
                // seq, and the server must not append again
                assert_eq!(clerk.append("0", "x").await, "");
                assert_eq!(clerk.get("0").await, "x");
            }
            .instrument(tracing::info_span!("dropped_reply_is_not_applied_twice")),
        );
    }

    #[test]
    fn replica_forwards_when_primary_endpoint_is_down() {
        let _guard = init_tracing();
        rt().block_on(
            async move {
                let cfg = Arc::new(Config::new(2).replicas(2));
                let servers = make_cluster(Arc::clone(&cfg));
                // the clerk cannot reach server 0 directly, but server 1
                // holds a handle to it and forwards
                let ends: Vec<Box<dyn Endpoint + Send + Sync>> = vec![
                    Box::new(DeadEnd),
                    Box::new(serve_chan(Arc::clone(&servers[1]))),
                ];
                let clerk = Clerk::new(ends, &cfg);

                clerk.put("0", "v").await;
                assert_eq!(clerk.get("0").await, "v");
            }
            .instrument(tracing::info_span!("replica_forwards_when_primary_endpoint_is_down")),
        );
    }

    #[test]
    fn retries_until_primary_reachable() {
        let _guard = init_tracing();
        rt().block_on(
            async move {
                let cfg = Arc::new(Config::new(1));
                let servers = make_cluster(Arc::clone(&cfg));
                let ends = vec![FlakyEnd {
                    inner: serve_chan(Arc::clone(&servers[0])),
                    failures: Arc::new(AtomicUsize::new(3)),
                }];
                let clerk = Clerk::new(ends, &cfg);

                clerk.put("0", "eventually").await;
                assert_eq!(clerk.get("0").await, "eventually");
            }
            .instrument(tracing::info_span!("retries_until_primary_reachable")),
        );
    }

    #[test]
    fn concurrent_clerks_disjoint_keys() {
        let _guard = init_tracing();
        rt().block_on(
            async move {
                let cfg = Arc::new(Config::new(4));
                let servers = make_cluster(Arc::clone(&cfg));
                let ends: Vec<_> = servers
                    .iter()
                    .map(|s| serve_chan(Arc::clone(s)))
                    .collect();

                let make_clerk = || Clerk::new(ends.clone(), &cfg);
                let (a, b) = (make_clerk(), make_clerk());
                let writer = |clerk: Clerk<ChanEndpoint>, offset: u64| async move {
                    for i in 0..100u64 {
                        let k = offset + i * 2;
                        clerk.put(k.to_string(), format!("v{}", k)).await;
                    }
                    clerk
                };
                let (a, _b) = tokio::join!(writer(a, 0), writer(b, 1));

                for k in 0..200u64 {
                    assert_eq!(a.get(k.to_string()).await, format!("v{}", k));
                }
            }
            .instrument(tracing::info_span!("concurrent_clerks_disjoint_keys")),
        );
    }
}
