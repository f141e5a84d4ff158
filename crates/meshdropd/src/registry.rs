//! Registry core — the single authority on membership and offerings (§4.2).
//!
//! Single-threaded cooperative: [`Registry::run`] processes one inbound
//! datagram, including every retry of any broadcast it triggers, before
//! reading the next. No work is ever `tokio::spawn`ed off this task —
//! that absence of concurrency is what makes the per-peer push
//! ordering guarantee trivially true.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use meshdrop_core::wire::{self, ControlMessage, RegisterOutcome, TableEntry, DATAGRAM_BUFFER};

/// Wait this long for a `TABLE_ACK` before retransmitting.
const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Initial send plus this many retries — three attempts total.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Active,
    Offline,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub name: String,
    pub status: PeerStatus,
    pub tcp_port: u16,
    pub files: HashSet<String>,
}

/// The registry's authoritative state: membership keyed by source
/// address, plus a FIFO of datagrams observed while waiting on a
/// table-ack that did not belong to that wait (see module docs and
/// `DESIGN.md`).
pub struct Registry {
    table: HashMap<SocketAddr, PeerRecord>,
    pending: VecDeque<(SocketAddr, Vec<u8>)>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Run forever, processing one datagram to completion at a time.
    pub async fn run(mut self, socket: UdpSocket) -> Result<()> {
        let mut buf = vec![0u8; DATAGRAM_BUFFER];
        loop {
            let (from, bytes) = self.next_datagram(&socket, &mut buf).await?;
            let msg = match wire::decode(&bytes) {
                Ok(msg) => msg,
                Err(_) => {
                    tracing::debug!(%from, "dropping malformed datagram");
                    continue;
                }
            };
            tracing::debug!(%from, kind = msg.kind_name(), "inbound datagram");
            self.handle(&socket, from, msg).await?;
        }
    }

    /// Pop a previously-queued stray datagram if one exists, else block
    /// on the socket. Ensures datagrams that arrived mid-broadcast are
    /// never lost, only deferred, and that per-sender order survives.
    async fn next_datagram(
        &mut self,
        socket: &UdpSocket,
        buf: &mut [u8],
    ) -> Result<(SocketAddr, Vec<u8>)> {
        if let Some(queued) = self.pending.pop_front() {
            return Ok(queued);
        }
        let (len, from) = socket.recv_from(buf).await.context("recv_from failed")?;
        Ok((from, buf[..len].to_vec()))
    }

    async fn handle(&mut self, socket: &UdpSocket, from: SocketAddr, msg: ControlMessage) -> Result<()> {
        match msg {
            ControlMessage::Register { name, tcp_port } => {
                self.handle_register(socket, from, name, tcp_port).await
            }
            ControlMessage::Offer { filenames } => self.handle_offer(socket, from, filenames).await,
            ControlMessage::Dereg { name } => self.handle_dereg(socket, from, name).await,
            other => {
                tracing::debug!(%from, kind = other.kind_name(), "ignoring unexpected message kind");
                Ok(())
            }
        }
    }

    /// Register (§4.2): reject on name collision with another active
    /// record, otherwise (re)create the record, ack, then push the
    /// current offerings view to the newcomer.
    async fn handle_register(
        &mut self,
        socket: &UdpSocket,
        from: SocketAddr,
        name: String,
        tcp_port: u16,
    ) -> Result<()> {
        let name_taken = self
            .table
            .iter()
            .any(|(addr, r)| *addr != from && r.status == PeerStatus::Active && r.name == name);

        if name_taken {
            tracing::info!(%from, name, "register rejected: name taken");
            wire::send(
                socket,
                from,
                &ControlMessage::RegisterAck {
                    outcome: RegisterOutcome::NameTaken,
                },
            )
            .await?;
            return Ok(());
        }

        self.table.insert(
            from,
            PeerRecord {
                name: name.clone(),
                status: PeerStatus::Active,
                tcp_port,
                files: HashSet::new(),
            },
        );
        tracing::info!(%from, name, tcp_port, "peer registered");

        // The welcome ack is fire-and-forget (§4.2) — no retry.
        wire::send(
            socket,
            from,
            &ControlMessage::RegisterAck {
                outcome: RegisterOutcome::Ok,
            },
        )
        .await?;

        let view = self.offerings_view();
        self.push_table(socket, from, &view).await?;
        Ok(())
    }

    /// Offer (§4.2): union filenames into the record's file set, ack,
    /// then broadcast. Silently ignored if the source has no active
    /// record — that can only happen for a peer the registry never saw
    /// register, which has no legitimate way to reach this path.
    async fn handle_offer(
        &mut self,
        socket: &UdpSocket,
        from: SocketAddr,
        filenames: Vec<String>,
    ) -> Result<()> {
        let Some(record) = self.table.get_mut(&from) else {
            tracing::debug!(%from, "offer from unregistered source, ignoring");
            return Ok(());
        };
        if record.status != PeerStatus::Active {
            tracing::debug!(%from, "offer from inactive record, ignoring");
            return Ok(());
        }

        record.files.extend(filenames);
        tracing::info!(%from, name = %record.name, files = record.files.len(), "offer accepted");

        wire::send(socket, from, &ControlMessage::OfferAck).await?;
        self.broadcast(socket).await?;
        Ok(())
    }

    /// Deregister (§4.2, §9): flip to offline and clear files. A name
    /// that does not match the source address's current active record
    /// is rejected (the recommended resolution to the open question in
    /// §9) by silently ignoring the request.
    async fn handle_dereg(&mut self, socket: &UdpSocket, from: SocketAddr, name: String) -> Result<()> {
        let Some(record) = self.table.get_mut(&from) else {
            tracing::debug!(%from, name, "dereg from unregistered source, ignoring");
            return Ok(());
        };
        if record.status != PeerStatus::Active || record.name != name {
            tracing::debug!(%from, name, "dereg rejected: no matching active record");
            return Ok(());
        }

        record.status = PeerStatus::Offline;
        record.files.clear();
        tracing::info!(%from, name, "peer deregistered");

        wire::send(socket, from, &ControlMessage::DeregAck).await?;
        self.broadcast(socket).await?;
        Ok(())
    }

    /// Broadcast (§4.2): snapshot the active set once, then push the
    /// freshly-recomputed view to each. No cross-peer atomicity —
    /// pushes proceed sequentially in table iteration order.
    async fn broadcast(&mut self, socket: &UdpSocket) -> Result<()> {
        let view = self.offerings_view();
        let targets: Vec<SocketAddr> = self
            .table
            .iter()
            .filter(|(_, r)| r.status == PeerStatus::Active)
            .map(|(addr, _)| *addr)
            .collect();

        for target in targets {
            self.push_table(socket, target, &view).await?;
        }
        Ok(())
    }

    /// Reliable Push (§4.2): send `TABLE`, wait up to 500ms for
    /// `TABLE_ACK` from `target`, retransmit up to three attempts
    /// total. On exhaustion, mark `target` offline and clear its
    /// files — but do not broadcast that change, to avoid recursion;
    /// the next explicit register/offer/dereg will pick it up.
    async fn push_table(&mut self, socket: &UdpSocket, target: SocketAddr, view: &[TableEntry]) -> Result<()> {
        let msg = ControlMessage::Table {
            view: view.to_vec(),
        };

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tracing::info!(%target, attempt, "sending table again...");
            }
            wire::send(socket, target, &msg).await?;

            if self.await_table_ack(socket, target).await? {
                return Ok(());
            }
        }

        tracing::warn!(%target, attempts = MAX_ATTEMPTS, "peer unresponsive, marking offline");
        if let Some(record) = self.table.get_mut(&target) {
            record.status = PeerStatus::Offline;
            record.files.clear();
        }
        Ok(())
    }

    /// Wait up to [`ACK_TIMEOUT`] for a `TABLE_ACK` from `target`.
    /// Datagrams that arrive in the meantime but don't satisfy that —
    /// wrong sender, wrong kind — are queued on `pending` rather than
    /// dropped, consuming the remaining budget of this same window.
    async fn await_table_ack(&mut self, socket: &UdpSocket, target: SocketAddr) -> Result<bool> {
        let deadline = Instant::now() + ACK_TIMEOUT;
        let mut buf = vec![0u8; DATAGRAM_BUFFER];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            let recv = tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await;
            let (len, from) = match recv {
                Err(_) => return Ok(false),
                Ok(inner) => inner.context("recv_from failed")?,
            };

            let bytes = buf[..len].to_vec();
            match wire::decode(&bytes) {
                Ok(ControlMessage::TableAck) if from == target => return Ok(true),
                Ok(_) => self.pending.push_back((from, bytes)),
                Err(_) => tracing::debug!(%from, "dropping malformed datagram while awaiting table ack"),
            }
        }
    }

    /// Recompute the offerings view: every file offered by every
    /// currently-active record, sorted for deterministic output.
    fn offerings_view(&self) -> Vec<TableEntry> {
        let mut entries = Vec::new();
        for (addr, record) in self.table.iter() {
            if record.status != PeerStatus::Active {
                continue;
            }
            for file in &record.files {
                entries.push(TableEntry {
                    filename: file.clone(),
                    owner_name: record.name.clone(),
                    owner_host: addr.ip(),
                    owner_tcp_port: record.tcp_port,
                });
            }
        }
        entries.sort_by(|a, b| (&a.filename, &a.owner_name).cmp(&(&b.filename, &b.owner_name)));
        entries
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
