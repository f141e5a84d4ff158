//! meshdropd — the meshdrop registry daemon.
//!
//! Tracks live peers, the files each offers, and their contact
//! addresses. Never stores file content — bodies move directly between
//! peers over a stream connection the registry is not party to.

mod registry;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use registry::Registry;

fn print_usage() {
    println!("Usage: meshdropd -s <udp_port>");
    println!();
    println!("  -s <udp_port>   UDP port the registry listens on");
    println!("  -h              print this message");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    let udp_port: u16 = match arg_refs.as_slice() {
        ["-h"] | ["--help"] => {
            print_usage();
            return Ok(());
        }
        ["-s", port] => port
            .parse()
            .with_context(|| format!("<udp_port> must be a number, got '{port}'"))?,
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    println!("Registry started with the following parameters:");
    println!("-s {udp_port}");

    let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, udp_port))
        .await
        .with_context(|| format!("failed to bind udp socket on port {udp_port}"))?;

    tracing::info!(udp_port, "registry listening");

    Registry::new().run(socket).await
}
