//! Shared state for the three concurrent peer roles (§5): the command
//! driver, the demultiplexer, and the stream acceptor.
//!
//! The datagram socket is written from any task but read only by the
//! demultiplexer; the local cache is written only by the
//! demultiplexer and read only by the command driver behind a coarse
//! `std::sync::Mutex` — both are the "sufficient" options §5 names
//! explicitly rather than anything fancier.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use meshdrop_core::wire::TableEntry;

/// `"<filename>|<owner_name>"` -> `(owner_host, owner_tcp_port)`.
pub type OfferingsCache = HashMap<String, (IpAddr, u16)>;

/// Capacity-1, drop-newest ack slot for one conversation kind (§5, §9).
/// A stale ack never blocks a fresh one because the 500ms timer on the
/// waiting side guarantees liveness regardless.
pub struct AckSlot {
    tx: mpsc::Sender<()>,
    rx: AsyncMutex<mpsc::Receiver<()>>,
}

impl AckSlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: AsyncMutex::new(rx),
        }
    }

    /// Called from the demultiplexer when the matching ack arrives.
    /// `try_send` drops the notification if the slot is already full —
    /// exactly the drop-newest behavior §5 asks for.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Discard anything left over from a previous command before
    /// starting a fresh wait, so a stale notification can't be
    /// mistaken for this command's ack.
    pub async fn drain(&self) {
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Wait up to `timeout` for a notification.
    pub async fn wait(&self, timeout: std::time::Duration) -> bool {
        let mut rx = self.rx.lock().await;
        matches!(tokio::time::timeout(timeout, rx.recv()).await, Ok(Some(())))
    }
}

pub struct PeerState {
    pub name: String,
    pub registry_addr: SocketAddr,
    pub local_tcp_port: u16,
    pub socket: UdpSocket,

    pub directory: StdMutex<Option<std::path::PathBuf>>,
    pub offered_files: StdMutex<std::collections::HashSet<String>>,
    pub offline: AtomicBool,
    pub cache: StdMutex<OfferingsCache>,

    pub offer_ack: AckSlot,
    pub dereg_ack: AckSlot,

    pub acceptor_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl PeerState {
    pub fn new(name: String, registry_addr: SocketAddr, local_tcp_port: u16, socket: UdpSocket) -> Self {
        Self {
            name,
            registry_addr,
            local_tcp_port,
            socket,
            directory: StdMutex::new(None),
            offered_files: StdMutex::new(std::collections::HashSet::new()),
            offline: AtomicBool::new(false),
            cache: StdMutex::new(HashMap::new()),
            offer_ack: AckSlot::new(),
            dereg_ack: AckSlot::new(),
            acceptor_handle: StdMutex::new(None),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Stop accepting new transfer connections and mark the peer
    /// offline. Matches "stop the stream acceptor" in §4.4 — the
    /// demultiplexer keeps running for the peer's entire lifetime.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
        self.offered_files.lock().unwrap().clear();
        if let Some(handle) = self.acceptor_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Replace the local cache wholesale from a `TABLE` push (§3, §4.3).
    pub fn replace_cache(&self, view: Vec<TableEntry>) {
        let mut cache = self.cache.lock().unwrap();
        cache.clear();
        for entry in view {
            let key = format!("{}|{}", entry.filename, entry.owner_name);
            cache.insert(key, (entry.owner_host, entry.owner_tcp_port));
        }
    }

    pub fn lookup(&self, filename: &str, owner: &str) -> Option<(IpAddr, u16)> {
        let key = format!("{filename}|{owner}");
        self.cache.lock().unwrap().get(&key).copied()
    }

    pub fn cache_is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    /// Bind the directory files are offered (and served) from (§4.4
    /// `setdir`, §3 "Directory binding").
    pub fn bind_directory(&self, path: std::path::PathBuf) {
        *self.directory.lock().unwrap() = Some(path);
    }

    pub fn directory(&self) -> Option<std::path::PathBuf> {
        self.directory.lock().unwrap().clone()
    }

    /// Whether any files are currently offered — governs the
    /// setdir-after-offer open question (SPEC_FULL §9: a second
    /// `setdir` is rejected while any files are still offered).
    pub fn has_offered_files(&self) -> bool {
        !self.offered_files.lock().unwrap().is_empty()
    }

    /// Union filenames into the locally offered set (§4.4 `offer`).
    /// Idempotent: offering the same name twice is a no-op the second
    /// time, same as the registry's own `files` set (§8).
    pub fn add_offered_files(&self, filenames: Vec<String>) {
        self.offered_files.lock().unwrap().extend(filenames);
    }

    /// Read the body of `filename` for a Transfer Server exchange
    /// (§4.6): it must be in the locally offered set *and* actually
    /// exist inside the bound directory — existence is re-checked at
    /// transfer time, never cached (§3).
    pub fn read_offered_file(&self, filename: &str) -> Option<Vec<u8>> {
        if !self.offered_files.lock().unwrap().contains(filename) {
            return None;
        }
        let dir = self.directory()?;
        std::fs::read(dir.join(filename)).ok()
    }

    /// Rows for `list`, sorted ascending by `(filename, owner)` (§4.4).
    pub fn cache_rows(&self) -> Vec<(String, String)> {
        let cache = self.cache.lock().unwrap();
        let mut rows: Vec<(String, String)> = cache
            .keys()
            .filter_map(|key| key.split_once('|'))
            .map(|(filename, owner)| (filename.to_string(), owner.to_string()))
            .collect();
        rows.sort();
        rows
    }
}
