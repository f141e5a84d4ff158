//! Control-plane datagram envelope.
//!
//! Every message between a peer and the registry is exactly one
//! datagram, encoded as a single serde-tagged JSON value. A buffer of
//! [`DATAGRAM_BUFFER`] bytes is large enough to hold a `TABLE` push
//! listing several dozen files across several dozen peers — this
//! design targets tens of peers on a LAN, not a large swarm, and
//! splitting a table across multiple datagrams is explicitly out of
//! scope.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use crate::error::Malformed;

/// Datagrams are never expected to exceed this size. The codec itself
/// does not enforce the limit on encode — it is a receive-buffer sizing
/// constant, comfortably above the 8 KiB floor the protocol requires.
pub const DATAGRAM_BUFFER: usize = 16 * 1024;

/// Outcome of a `REGISTER` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterOutcome {
    Ok,
    NameTaken,
}

/// One row of the registry's offerings view, as pushed in a `TABLE`
/// message. The peer-side composite key (`"<filename>|<owner_name>"`)
/// is derived from this by the receiver, not carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub filename: String,
    pub owner_name: String,
    pub owner_host: IpAddr,
    pub owner_tcp_port: u16,
}

/// All control messages exchanged between a peer and the registry.
///
/// Tagged with an explicit `kind` field rather than relying on enum
/// variant order, so a stray byte never silently decodes into the
/// wrong variant across a future reordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body")]
pub enum ControlMessage {
    Register { name: String, tcp_port: u16 },
    RegisterAck { outcome: RegisterOutcome },
    Table { view: Vec<TableEntry> },
    TableAck,
    Offer { filenames: Vec<String> },
    OfferAck,
    Dereg { name: String },
    DeregAck,
}

impl ControlMessage {
    /// Short name for logging — avoids `Debug`-formatting a payload
    /// that may contain a long file list just to say what kind it was.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ControlMessage::Register { .. } => "REGISTER",
            ControlMessage::RegisterAck { .. } => "REGISTER_ACK",
            ControlMessage::Table { .. } => "TABLE",
            ControlMessage::TableAck => "TABLE_ACK",
            ControlMessage::Offer { .. } => "OFFER",
            ControlMessage::OfferAck => "OFFER_ACK",
            ControlMessage::Dereg { .. } => "DEREG",
            ControlMessage::DeregAck => "DEREG_ACK",
        }
    }
}

/// Encode a control message to its wire bytes.
pub fn encode(msg: &ControlMessage) -> Vec<u8> {
    serde_json::to_vec(msg).expect("control message serialization never fails")
}

/// Decode a datagram's bytes into a control message.
///
/// Returns [`Malformed`] rather than the underlying `serde_json` error
/// — the caller never needs more detail than "log and drop".
pub fn decode(bytes: &[u8]) -> Result<ControlMessage, Malformed> {
    serde_json::from_slice(bytes).map_err(|_| Malformed)
}

/// Send one control message as a single datagram.
pub async fn send(socket: &UdpSocket, to: SocketAddr, msg: &ControlMessage) -> Result<()> {
    let bytes = encode(msg);
    socket
        .send_to(&bytes, to)
        .await
        .with_context(|| format!("send_to({to}) failed"))?;
    Ok(())
}

/// Wait up to `deadline` for one datagram and decode it.
///
/// Three outcomes:
/// - `Ok(Some((msg, from)))` — a well-formed datagram arrived in time.
/// - `Ok(None)` — either the deadline elapsed, or a datagram arrived
///   but failed to decode (already logged and dropped here).
/// - `Err(_)` — the underlying socket read itself failed.
pub async fn recv_timeout(
    socket: &UdpSocket,
    deadline: Duration,
    buf: &mut [u8],
) -> Result<Option<(ControlMessage, SocketAddr)>> {
    let recv = tokio::time::timeout(deadline, socket.recv_from(buf)).await;
    let (len, from) = match recv {
        Err(_) => return Ok(None),
        Ok(inner) => inner.context("recv_from failed")?,
    };
    match decode(&buf[..len]) {
        Ok(msg) => Ok(Some((msg, from))),
        Err(_) => {
            tracing::debug!(%from, bytes = len, "dropping malformed datagram");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_register() {
        let msg = ControlMessage::Register {
            name: "heyy".to_string(),
            tcp_port: 5001,
        };
        let bytes = encode(&msg);
        let back = decode(&bytes).unwrap();
        match back {
            ControlMessage::Register { name, tcp_port } => {
                assert_eq!(name, "heyy");
                assert_eq!(tcp_port, 5001);
            }
            other => panic!("expected Register, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_table() {
        let msg = ControlMessage::Table {
            view: vec![TableEntry {
                filename: "wee.txt".to_string(),
                owner_name: "A".to_string(),
                owner_host: "127.0.0.1".parse().unwrap(),
                owner_tcp_port: 6000,
            }],
        };
        let bytes = encode(&msg);
        let back = decode(&bytes).unwrap();
        match back {
            ControlMessage::Table { view } => assert_eq!(view.len(), 1),
            other => panic!("expected Table, got {other:?}"),
        }
    }

    #[test]
    fn malformed_datagram_is_rejected() {
        let err = decode(b"not json at all");
        assert!(err.is_err());
    }

    #[test]
    fn kind_names() {
        assert_eq!(ControlMessage::TableAck.kind_name(), "TABLE_ACK");
        assert_eq!(
            ControlMessage::Dereg { name: "x".into() }.kind_name(),
            "DEREG"
        );
    }
}
