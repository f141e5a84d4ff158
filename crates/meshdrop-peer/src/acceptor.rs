//! The stream acceptor (§4.5) and the transfer server half of §4.6.
//!
//! Binds before registration so the contact tuple advertised to the
//! registry is already reachable. Accepts one connection at a time —
//! sequential acceptance is sufficient at the "tens of peers on a LAN"
//! scale this design targets (§1) — and runs the whole request/response
//! exchange to completion before accepting the next.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use meshdrop_core::framing;

use crate::state::PeerState;

/// Accept connections forever. Each transfer runs to completion before
/// the next `accept()` — matching §4.5's "sequential acceptor is
/// sufficient at this scale".
pub async fn run(state: Arc<PeerState>, listener: TcpListener) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        if let Err(e) = serve(&state, stream).await {
            tracing::warn!(%peer_addr, error = %e, "transfer failed");
        }
    }
}

/// Transfer Server sub-protocol (§4.6): read a requested filename,
/// check it against the locally offered set and the bound directory,
/// and send either a zero-length rejection or the file body behind its
/// big-endian length prefix.
async fn serve(state: &Arc<PeerState>, stream: TcpStream) -> std::io::Result<()> {
    let peer_host = stream
        .peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Accepting connection request from {peer_host}.");

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let filename = framing::read_line(&mut reader).await?;

    let body = state.read_offered_file(&filename);
    let Some(data) = body else {
        framing::write_length(&mut write_half, 0).await?;
        write_half.flush().await?;
        return Ok(());
    };

    println!("Transferring {filename}...");
    framing::write_length(&mut write_half, data.len() as u64).await?;
    write_half.write_all(&data).await?;
    write_half.flush().await?;
    println!("{filename} transferred successfully!");
    println!("Connection with client {peer_host} closed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UdpSocket;

    async fn new_state(dir: &std::path::Path, files: &[&str]) -> Arc<PeerState> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let state = Arc::new(PeerState::new(
            "H".into(),
            "127.0.0.1:9".parse().unwrap(),
            0,
            socket,
        ));
        state.bind_directory(dir.to_path_buf());
        for f in files {
            state.add_offered_files(vec![f.to_string()]);
        }
        state
    }

    #[tokio::test]
    async fn serves_known_file() {
        let dir = tempfile_dir();
        std::fs::write(dir.join("1.txt"), b"hello world").unwrap();
        let state = new_state(&dir, &["1.txt"]).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let server = {
            let state = state.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                serve(&state, stream).await.unwrap();
            })
        };

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"1.txt\n").await.unwrap();
        let mut len_buf = [0u8; 8];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u64::from_be_bytes(len_buf);
        assert_eq!(len, 11);
        let mut data = vec![0u8; len as usize];
        client.read_exact(&mut data).await.unwrap();
        assert_eq!(&data, b"hello world");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unknown_file() {
        let dir = tempfile_dir();
        let state = new_state(&dir, &[]).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let server = {
            let state = state.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                serve(&state, stream).await.unwrap();
            })
        };

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"nope.txt\n").await.unwrap();
        let mut len_buf = [0u8; 8];
        client.read_exact(&mut len_buf).await.unwrap();
        assert_eq!(u64::from_be_bytes(len_buf), 0);

        server.await.unwrap();
    }

    /// Round-trip property (§8): a file transferred client→server is
    /// byte-identical on the requester's side, across a size that
    /// spans more than one TCP read.
    #[tokio::test]
    async fn end_to_end_transfer_is_byte_identical() {
        let dir = tempfile_dir();
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.join("big.bin"), &body).unwrap();
        let state = new_state(&dir, &["big.bin"]).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tcp_port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(run(state, listener));

        let work_dir = tempfile_dir();
        let guard = CwdGuard::enter(&work_dir);
        crate::transfer::request_file(
            "big.bin",
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            tcp_port,
            "H",
        )
        .await
        .unwrap();
        let downloaded = std::fs::read(work_dir.join("big.bin")).unwrap();
        drop(guard);

        assert_eq!(downloaded, body);
        server.abort();
    }

    /// Serializes `std::env::set_current_dir` across tests in this
    /// module — `request_file` writes to the process cwd, and tests
    /// run concurrently on separate threads.
    struct CwdGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        previous: std::path::PathBuf,
    }

    impl CwdGuard {
        fn enter(dir: &std::path::Path) -> Self {
            static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
            let lock = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            let previous = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir).unwrap();
            Self {
                _lock: lock,
                previous,
            }
        }
    }

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.previous);
        }
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "meshdrop-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
}
