use std::time::Duration;

use log::info;
use structopt::StructOpt;

use pbservice::tests::Cluster;
use viewservice::Config;

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Number of replicas to start
    #[structopt(short, long, default_value = "3")]
    servers: usize,

    /// Heartbeat period in milliseconds
    #[structopt(long, default_value = "100")]
    ping_interval: u64,

    /// Missed heartbeats before a server is declared dead
    #[structopt(long, default_value = "5")]
    dead_pings: u32,

    /// Timeout of a single RPC in milliseconds
    #[structopt(long, default_value = "250")]
    rpc_timeout: u64,

    /// Number of appends to issue
    #[structopt(short, long, default_value = "50")]
    ops: usize,

    /// Lose some requests and replies
    #[structopt(long)]
    unreliable: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let config = Config {
        ping_interval: Duration::from_millis(opt.ping_interval),
        dead_pings: opt.dead_pings,
        rpc_timeout: Duration::from_millis(opt.rpc_timeout),
    };

    let mut cluster = Cluster::new(config).await;
    for i in 0..opt.servers {
        cluster.start(&format!("s{}", i)).await;
    }
    cluster.net.set_reliable(!opt.unreliable);

    let mut ck = cluster.clerk();
    let mut expected = String::new();
    for i in 0..opt.ops {
        if i == opt.ops / 2 {
            let view = cluster.vs.get().await?;
            if !view.backup.is_empty() {
                info!("crashing primary {} of view {}", view.primary, view.viewnum);
                cluster.crash(&view.primary);
            }
        }
        let part = format!("{};", i);
        ck.append("log", &part).await;
        expected.push_str(&part);
    }

    let got = ck.get("log").await.unwrap_or_default();
    if got != expected {
        return Err(format!("log diverged: got {:?}, expected {:?}", got, expected).into());
    }
    println!(
        "{} appends applied once each, final view {:?}",
        opt.ops,
        cluster.vs.get().await?
    );
    Ok(())
}
