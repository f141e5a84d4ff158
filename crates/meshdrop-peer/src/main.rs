//! meshdrop-peer — a peer in the meshdrop file-sharing network.
//!
//! Three concurrent roles share one datagram endpoint and one stream
//! listener (§5): the demultiplexer (owns the UDP receive end), the
//! stream acceptor (serves file bodies), and this binary's own command
//! driver loop (issues datagrams, awaits acks, renders output).

mod acceptor;
mod demux;
mod driver;
mod register;
mod shell;
mod state;
mod transfer;

use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::net::{TcpListener, UdpSocket};

use register::RegisterResult;
use state::PeerState;

fn print_usage() {
    println!("Usage: meshdrop-peer -c <name> <registry_host> <registry_udp_port> <local_udp_port> <local_tcp_port>");
    println!();
    println!("  -c <name>               display name, unique across the live membership");
    println!("  <registry_host>         registry's host or IP address");
    println!("  <registry_udp_port>     registry's UDP listen port");
    println!("  <local_udp_port>        UDP port this peer binds for control traffic");
    println!("  <local_tcp_port>        TCP port this peer binds to serve file transfers");
    println!("  -h                      print this message");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    let (name, registry_host, registry_udp_port, local_udp_port, local_tcp_port) = match arg_refs.as_slice() {
        ["-h"] | ["--help"] => {
            print_usage();
            return Ok(());
        }
        ["-c", name, registry_host, registry_udp_port, local_udp_port, local_tcp_port] => {
            let registry_udp_port: u16 = registry_udp_port
                .parse()
                .with_context(|| format!("<registry_udp_port> must be a number, got '{registry_udp_port}'"))?;
            let local_udp_port: u16 = local_udp_port
                .parse()
                .with_context(|| format!("<local_udp_port> must be a number, got '{local_udp_port}'"))?;
            let local_tcp_port: u16 = local_tcp_port
                .parse()
                .with_context(|| format!("<local_tcp_port> must be a number, got '{local_tcp_port}'"))?;
            (
                name.to_string(),
                registry_host.to_string(),
                registry_udp_port,
                local_udp_port,
                local_tcp_port,
            )
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    println!("Peer started with the following parameters:");
    println!("-c {name}");
    println!("{registry_host}");
    println!("{registry_udp_port}");
    println!("{local_udp_port}");
    println!("{local_tcp_port}");

    let registry_addr = tokio::net::lookup_host((registry_host.as_str(), registry_udp_port))
        .await
        .with_context(|| format!("failed to resolve registry host '{registry_host}'"))?
        .next()
        .with_context(|| format!("registry host '{registry_host}' resolved to no addresses"))?;

    // Bind the TCP listener before registration (§4.5) — the contact
    // tuple advertised to the registry must already be reachable.
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, local_tcp_port))
        .await
        .with_context(|| format!("failed to bind tcp listener on port {local_tcp_port}"))?;
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local_udp_port))
        .await
        .with_context(|| format!("failed to bind udp socket on port {local_udp_port}"))?;

    match register::register(&socket, registry_addr, &name, local_tcp_port).await? {
        RegisterResult::NameTaken => {
            println!("already registered, registration rejected");
            return Ok(());
        }
        RegisterResult::NotResponding => {
            println!("server not responding");
            return Ok(());
        }
        RegisterResult::Ok => {}
    }
    tracing::info!(name, local_udp_port, local_tcp_port, "registered with registry");

    let state = Arc::new(PeerState::new(name, registry_addr, local_tcp_port, socket));

    tokio::spawn(demux::run(state.clone()));

    let acceptor_handle = tokio::spawn(acceptor::run(state.clone(), listener));
    *state.acceptor_handle.lock().unwrap() = Some(acceptor_handle);

    run_shell(state).await;
    Ok(())
}

/// The command loop: print the prompt, read one tokenized command,
/// dispatch it, repeat until stdin closes (§4.4, §6).
async fn run_shell(state: Arc<PeerState>) {
    let mut stdin = BufReader::new(tokio::io::stdin());
    loop {
        print!("{}", shell::PROMPT);
        if std::io::stdout().flush().is_err() {
            return;
        }
        match shell::read_command(&mut stdin).await {
            None => return,
            Some(tokens) if tokens.is_empty() => continue,
            Some(tokens) => driver::dispatch(&state, &tokens).await,
        }
    }
}
