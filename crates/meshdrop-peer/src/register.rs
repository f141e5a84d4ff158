//! Initial registration (§4.4) — run once, before the demultiplexer
//! exists, so it reads the socket directly rather than through an
//! [`crate::state::AckSlot`].

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use meshdrop_core::wire::{self, ControlMessage, RegisterOutcome, DATAGRAM_BUFFER};

const ACK_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_ATTEMPTS: u32 = 3;

pub enum RegisterResult {
    Ok,
    NameTaken,
    NotResponding,
}

/// Send `REGISTER`, wait up to 500ms for `REGISTER_ACK`, three attempts
/// total (§4.4). A `TABLE` push may arrive interleaved with the ack on
/// a successful registration; it is left on the socket for the
/// demultiplexer to pick up once it starts, so it is not consumed
/// here.
pub async fn register(
    socket: &UdpSocket,
    registry_addr: SocketAddr,
    name: &str,
    tcp_port: u16,
) -> Result<RegisterResult> {
    let msg = ControlMessage::Register {
        name: name.to_string(),
        tcp_port,
    };
    let mut buf = vec![0u8; DATAGRAM_BUFFER];

    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            tracing::info!(attempt, "retrying registration");
        }
        wire::send(socket, registry_addr, &msg).await?;

        let deadline = Instant::now() + ACK_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some((reply, from)) = wire::recv_timeout(socket, remaining, &mut buf).await? else {
                break;
            };
            if from != registry_addr {
                tracing::debug!(%from, "ignoring datagram from unexpected sender during registration");
                continue;
            }
            if let ControlMessage::RegisterAck { outcome } = reply {
                return Ok(match outcome {
                    RegisterOutcome::Ok => RegisterResult::Ok,
                    RegisterOutcome::NameTaken => RegisterResult::NameTaken,
                });
            }
            tracing::debug!(kind = reply.kind_name(), "ignoring unexpected kind during registration");
        }
    }

    Ok(RegisterResult::NotResponding)
}
