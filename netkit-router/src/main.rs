use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use netkit_router::config;
use netkit_router::dataplane::{RawLinkSet, Reactor, Router};

#[derive(Parser)]
#[command(name = "router")]
#[command(about = "IPv4 dataplane router over raw ethernet links")]
struct Args {
    /// Routing table file
    rtable: PathBuf,

    /// Interface names, in index order
    #[arg(required = true)]
    interfaces: Vec<String>,

    /// Optional static ARP table file
    #[arg(long)]
    arp_table: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("netkit_router=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let routes = config::load_route_table(&args.rtable)?;
    info!(entries = routes.len(), "routing table loaded");

    let links = RawLinkSet::open(&args.interfaces)?;
    let mut router = Router::new(links);
    router.add_routes(routes);

    if let Some(path) = &args.arp_table {
        let entries = config::load_arp_table(path)?;
        info!(entries = entries.len(), "static ARP table loaded");
        for (ip, mac) in entries {
            router.add_arp_entry(ip, mac);
        }
    }

    Reactor::new(router).run()?;
    Ok(())
}
