//! The peer demultiplexer (§4.3).
//!
//! Owns the datagram receive end exclusively for the peer's entire
//! lifetime after successful registration. Never blocks on anything
//! but the datagram read — acks are routed with a non-blocking
//! `try_send`-backed notify, and the cache swap always happens before
//! the "Client table updated" line is printed (the ordering guarantee
//! §5 calls out explicitly).

use std::sync::Arc;

use meshdrop_core::wire::{self, ControlMessage, DATAGRAM_BUFFER};

use crate::state::PeerState;

pub async fn run(state: Arc<PeerState>) {
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    loop {
        let (len, from) = match state.socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "demultiplexer recv failed");
                continue;
            }
        };

        let msg = match wire::decode(&buf[..len]) {
            Ok(msg) => msg,
            Err(_) => {
                tracing::debug!(%from, "dropping malformed datagram");
                continue;
            }
        };

        match msg {
            ControlMessage::Table { view } => {
                state.replace_cache(view);
                if let Err(e) = wire::send(&state.socket, from, &ControlMessage::TableAck).await {
                    tracing::warn!(error = %e, "failed to ack table push");
                }
                println!("Client table updated");
            }
            ControlMessage::OfferAck => state.offer_ack.notify(),
            ControlMessage::DeregAck => state.dereg_ack.notify(),
            other => {
                tracing::trace!(kind = other.kind_name(), %from, "discarding unexpected message kind");
            }
        }
    }
}
