//! The file transfer sub-protocol (§4.6) — client half.
//!
//! One stream connection carries exactly one request/response
//! exchange, bypassing the registry entirely.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use meshdrop_core::framing;

/// Connect to `owner`, request `filename`, and write the body to a
/// file of the same name in the current working directory.
pub async fn request_file(filename: &str, owner_host: IpAddr, owner_tcp_port: u16, owner_name: &str) -> Result<()> {
    let addr = SocketAddr::new(owner_host, owner_tcp_port);
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {owner_name} at {addr}"))?;
    println!("Connection with client {owner_name} established.");

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    framing::write_line(&mut write_half, filename)
        .await
        .context("failed to send requested filename")?;

    let len = framing::read_length(&mut reader)
        .await
        .context("failed to read length prefix")?;

    if len == 0 {
        println!("Invalid Request");
        return Ok(());
    }

    println!("Downloading {filename}...");
    let mut data = vec![0u8; len as usize];
    reader
        .read_exact(&mut data)
        .await
        .context("connection reset while downloading file body")?;

    tokio::fs::write(filename, &data)
        .await
        .with_context(|| format!("failed to write {filename} to disk"))?;

    println!("{filename} downloaded successfully!");
    println!("Connection with client {owner_name} closed.");
    Ok(())
}
