use clap::Parser;
use tracing_subscriber::EnvFilter;

use netkit_broker::server::Server;

#[derive(Parser)]
#[command(name = "server")]
#[command(about = "UDP to TCP topic broker")]
struct Args {
    /// Port for both the TCP listener and the UDP ingest socket
    port: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("netkit_broker=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let mut server = Server::bind(args.port)?;
    server.run()?;
    Ok(())
}
