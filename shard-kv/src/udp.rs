//! UDP datagram transport.
//!
//! Requests go out as one bincode-framed datagram; replies come back wrapped
//! in a [`ReplyFrame`] carrying the request's `(client_id, seq)` so the
//! client end can discard stale replies left over from timed-out calls.

use crate::msg::{Reply, Request};
use crate::server::KvServer;
use crate::Endpoint;
use color_eyre::eyre::{eyre, Report, WrapErr};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{info, trace, warn};

const MAX_DGRAM: usize = 8192;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReplyFrame {
    client_id: u64,
    seq: u64,
    reply: Reply,
}

/// Serve `srv` on the already-bound `sk` until the socket errors.
///
/// Replies are sent from a pending set while the loop keeps receiving, so one
/// slow peer does not stall the socket.
pub async fn serve_udp(sk: UdpSocket, srv: Arc<KvServer>) -> Result<(), Report> {
    let sk = Arc::new(sk);
    let mut buf = [0u8; MAX_DGRAM];
    let mut pending_sends = FuturesUnordered::new();
    let local = sk.local_addr()?;
    info!(addr = ?local, idx = srv.index(), "listening");
    loop {
        tokio::select!(
            Some(res) = pending_sends.next() => {
                if let Err(err) = res {
                    warn!(?err, "dropping reply");
                }
            }
            res = sk.recv_from(&mut buf) => {
                let (len, from) = res.wrap_err("udp recv")?;
                let req: Request = match bincode::deserialize(&buf[..len]) {
                    Ok(req) => req,
                    Err(err) => {
                        warn!(?err, ?from, "bad request payload");
                        continue;
                    }
                };
                trace!(?from, client_id = req.client_id, seq = req.seq, "received request");
                let frame = ReplyFrame {
                    client_id: req.client_id,
                    seq: req.seq,
                    reply: srv.call(&req),
                };
                let data = bincode::serialize(&frame).wrap_err("serialize reply")?;
                let sk = Arc::clone(&sk);
                pending_sends.push(async move {
                    sk.send_to(&data, from).await?;
                    Ok::<_, Report>(())
                });
            }
        );
    }
}

/// Client end over UDP.
///
/// One request is in flight at a time per endpoint; silence past the timeout
/// becomes a transport failure, which the clerk treats like any other lost
/// datagram and retries.
#[derive(Debug, Clone)]
pub struct UdpEndpoint {
    sk: Arc<UdpSocket>,
    addr: SocketAddr,
    timeout: Duration,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl UdpEndpoint {
    pub async fn connect(addr: SocketAddr) -> Result<Self, Report> {
        let sk = UdpSocket::bind("0.0.0.0:0")
            .await
            .wrap_err("bind client socket")?;
        Ok(UdpEndpoint {
            sk: Arc::new(sk),
            addr,
            timeout: DEFAULT_TIMEOUT,
            gate: Default::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Endpoint for UdpEndpoint {
    fn call(
        &self,
        req: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, Report>> + Send + 'static>> {
        let sk = Arc::clone(&self.sk);
        let addr = self.addr;
        let timeout = self.timeout;
        let gate = Arc::clone(&self.gate);
        Box::pin(async move {
            let _gate = gate.lock().await;
            let data = bincode::serialize(&req).wrap_err("serialize request")?;
            sk.send_to(&data, addr).await.wrap_err("udp send")?;

            let mut buf = [0u8; MAX_DGRAM];
            tokio::time::timeout(timeout, async {
                loop {
                    let (len, _from) = sk.recv_from(&mut buf).await.wrap_err("udp recv")?;
                    let frame: ReplyFrame = match bincode::deserialize(&buf[..len]) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(?err, "bad reply payload");
                            continue;
                        }
                    };
                    if frame.client_id == req.client_id && frame.seq == req.seq {
                        return Ok(frame.reply);
                    }
                    trace!(seq = frame.seq, "discarding stale reply");
                }
            })
            .await
            .map_err(|_| eyre!("request to {} timed out", addr))?
        })
    }
}
