//! Serve a cluster over UDP.
//!
//! Without `--index`, every server runs in this process on consecutive ports
//! with the in-process handle table populated, so replicas forward to the
//! shard primary. With `--index`, only that server runs here and there is no
//! handle table; requests for other shards are answered `ErrWrongGroup`.

use color_eyre::eyre::Report;
use shard_kv::server::{make_cluster, KvServer};
use shard_kv::udp::serve_udp;
use shard_kv::Config;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use structopt::StructOpt;
use tokio::net::UdpSocket;
use tracing::{info, info_span};
use tracing_error::ErrorLayer;
use tracing_futures::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, StructOpt)]
#[structopt(name = "kvserver")]
struct Opt {
    /// First server's UDP port; server i listens on port + i.
    #[structopt(short, long, default_value = "4242")]
    port: u16,

    /// Cluster size (= shard count).
    #[structopt(short, long, default_value = "1")]
    nservers: usize,

    /// Replica fan-out clients sweep per retry pass.
    #[structopt(short = "r", long, default_value = "1")]
    nreplicas: usize,

    /// Serve only this index, with no in-process forwarding.
    #[structopt(short, long)]
    index: Option<usize>,
}

fn main() -> Result<(), Report> {
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(ErrorLayer::default());
    subscriber.init();
    color_eyre::install()?;
    let opt = Opt::from_args();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let cfg = Arc::new(Config::new(opt.nservers).replicas(opt.nreplicas));
        let ip = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        match opt.index {
            Some(i) => {
                let srv = Arc::new(KvServer::new(cfg, i));
                let sk = UdpSocket::bind(SocketAddr::new(ip, opt.port + i as u16)).await?;
                serve_udp(sk, srv)
                    .instrument(info_span!("kvserver", idx = i))
                    .await
            }
            None => {
                let mut tasks = Vec::new();
                for srv in make_cluster(Arc::clone(&cfg)) {
                    let i = srv.index();
                    let sk = UdpSocket::bind(SocketAddr::new(ip, opt.port + i as u16)).await?;
                    tasks.push(tokio::spawn(
                        serve_udp(sk, srv).instrument(info_span!("kvserver", idx = i)),
                    ));
                }
                info!(nservers = cfg.nservers, nreplicas = cfg.nreplicas, "cluster up");
                for task in tasks {
                    task.await??;
                }
                Ok(())
            }
        }
    })
}
