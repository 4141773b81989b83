use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use netkit_broker::proto::CLIENT_ID_MAX_LEN;
use netkit_broker::subscriber::Subscriber;

#[derive(Parser)]
#[command(name = "subscriber")]
#[command(about = "Topic broker subscriber client")]
struct Args {
    /// Client id, unique among connected subscribers
    client_id: String,

    /// Broker address
    server_ip: Ipv4Addr,

    /// Broker port
    server_port: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("netkit_broker=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    if args.client_id.is_empty() || args.client_id.len() > CLIENT_ID_MAX_LEN {
        return Err(format!("client id must be 1..={CLIENT_ID_MAX_LEN} bytes").into());
    }

    let addr = SocketAddr::V4(SocketAddrV4::new(args.server_ip, args.server_port));
    let mut subscriber = Subscriber::connect(&args.client_id, addr)?;
    subscriber.run()?;
    Ok(())
}
