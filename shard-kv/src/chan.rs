//! In-process channel transport.
//!
//! Useful for tests and for single-process clusters: requests travel over a
//! `flume` channel to a serve task, which runs each one on its own tokio task
//! so inbound requests proceed concurrently.

use crate::msg::{Reply, Request};
use crate::server::KvServer;
use crate::Endpoint;
use color_eyre::eyre::{eyre, Report};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;
use tracing_futures::Instrument;

/// Client end of an in-process channel to one server. Clones share the
/// channel.
#[derive(Debug, Clone)]
pub struct ChanEndpoint {
    tx: flume::Sender<(Request, flume::Sender<Reply>)>,
}

/// Spawn a serve task for `srv` and return an endpoint connected to it.
///
/// The task exits once every endpoint clone is dropped.
pub fn serve_chan(srv: Arc<KvServer>) -> ChanEndpoint {
    let (tx, rx) = flume::unbounded::<(Request, flume::Sender<Reply>)>();
    let idx = srv.index();
    tokio::spawn(
        async move {
            while let Ok((req, reply_tx)) = rx.recv_async().await {
                let srv = Arc::clone(&srv);
                tokio::spawn(async move {
                    let reply = srv.call(&req);
                    // a closed receiver means the caller stopped waiting
                    let _ = reply_tx.send_async(reply).await;
                });
            }
            debug!("all endpoints dropped, exiting");
        }
        .instrument(tracing::debug_span!("chan_server", idx)),
    );
    ChanEndpoint { tx }
}

impl Endpoint for ChanEndpoint {
    fn call(
        &self,
        req: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            let (reply_tx, reply_rx) = flume::bounded(1);
            tx.send_async((req, reply_tx))
                .await
                .map_err(|_| eyre!("server hung up"))?;
            reply_rx
                .recv_async()
                .await
                .map_err(|_| eyre!("no reply from server"))
        })
    }
}
