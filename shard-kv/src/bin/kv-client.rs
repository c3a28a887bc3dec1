//! Drive a cluster over UDP: replay a trace file, or run a short smoke
//! sequence when no trace is given.

use color_eyre::eyre::Report;
use shard_kv::udp::UdpEndpoint;
use shard_kv::{Clerk, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tracing::{info, info_span};
use tracing_error::ErrorLayer;
use tracing_futures::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, StructOpt)]
#[structopt(name = "kv-client")]
struct Opt {
    /// Address of server 0; server i is at port + i.
    #[structopt(short, long, default_value = "127.0.0.1:4242")]
    addr: SocketAddr,

    /// Cluster size (= shard count).
    #[structopt(short, long, default_value = "1")]
    nservers: usize,

    /// Replica fan-out to sweep per retry pass.
    #[structopt(short = "r", long, default_value = "1")]
    nreplicas: usize,

    /// Trace of ops to replay: `GET k` / `PUT k v` / `APPEND k v` lines.
    #[structopt(long)]
    trace: Option<PathBuf>,
}

async fn replay(clerk: &Clerk<UdpEndpoint>, ops: Vec<kv_workload::Op>) -> Vec<Duration> {
    let mut durs = Vec::with_capacity(ops.len());
    for op in ops {
        let then = Instant::now();
        match op {
            kv_workload::Op::Get(k) => {
                clerk.get(k).await;
            }
            kv_workload::Op::Put(k, v) => clerk.put(k, v).await,
            kv_workload::Op::Append(k, v) => {
                clerk.append(k, v).await;
            }
        }
        durs.push(then.elapsed());
    }
    durs
}

async fn smoke(clerk: &Clerk<UdpEndpoint>) {
    clerk.put("0", "hello").await;
    info!(got = %clerk.get("0").await, "get after put");
    info!(old = %clerk.append("0", " world").await, "append");
    info!(got = %clerk.get("0").await, "final");
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
        .enable_all()
        .build()?;

    rt.block_on(
        async move {
            let cfg = Config::new(opt.nservers).replicas(opt.nreplicas);
            let mut ends = Vec::with_capacity(opt.nservers);
            for i in 0..opt.nservers {
                let addr = SocketAddr::new(opt.addr.ip(), opt.addr.port() + i as u16);
                ends.push(UdpEndpoint::connect(addr).await?);
            }
            let clerk = Clerk::new(ends, &cfg);

            match opt.trace {
                Some(path) => {
                    let ops = kv_workload::ops(&path)
                        .map_err(|e| color_eyre::eyre::eyre!("load trace: {}", e))?;
                    let count = ops.len();
                    let start = Instant::now();
                    let durs = replay(&clerk, ops).await;
                    let elapsed = start.elapsed();
                    let mean_us =
                        durs.iter().map(|d| d.as_micros()).sum::<u128>() / durs.len().max(1) as u128;
                    info!(count, elapsed_us = elapsed.as_micros() as u64, mean_us = mean_us as u64, "replay done");
                    println!(
                        "count={},elapsed_us={},mean_us={}",
                        count,
                        elapsed.as_micros(),
                        mean_us
                    );
                }
                None => smoke(&clerk).await,
            }
            Ok::<_, Report>(())
        }
        .instrument(info_span!("kv-client")),
    )
}
