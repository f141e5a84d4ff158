//! The command driver (§4.4) — one command executes at a time.
//!
//! [`dispatch`] takes an already-tokenized command line (SPEC_FULL
//! §4.4 [ADDED]) so the dispatch logic itself never touches stdin and
//! stays unit-testable without a terminal, matching `driver::dispatch`
//! as named there.

use std::sync::Arc;
use std::time::Duration;

use meshdrop_core::wire::{self, ControlMessage};

use crate::state::{AckSlot, PeerState};
use crate::transfer;

const ACK_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_ATTEMPTS: u32 = 3;

/// Error/rejection convention (§7): single-line messages prefixed and
/// suffixed with angle brackets, matching the `< Invalid Request >`
/// form the test fixtures use (§8 scenario 5).
fn report_error(msg: impl AsRef<str>) {
    println!("< {} >", msg.as_ref());
}

/// Send `msg` to the registry and wait for the matching ack, retrying
/// up to [`MAX_ATTEMPTS`] times at [`ACK_TIMEOUT`] apiece (§4.4, §4.2
/// Reliable Push — same retry shape, mirrored on the peer side).
async fn send_with_ack(state: &PeerState, msg: &ControlMessage, ack_slot: &AckSlot) -> anyhow::Result<bool> {
    ack_slot.drain().await;
    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            tracing::info!(attempt, kind = msg.kind_name(), "retrying");
        }
        wire::send(&state.socket, state.registry_addr, msg).await?;
        if ack_slot.wait(ACK_TIMEOUT).await {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Dispatch one already-tokenized command line. `tokens[0]` is the
/// command name; the rest are its arguments.
pub async fn dispatch(state: &Arc<PeerState>, tokens: &[String]) {
    let Some(command) = tokens.first() else {
        return;
    };

    if state.is_offline() && command != "list" {
        report_error("invalid command");
        return;
    }

    match command.as_str() {
        "setdir" => cmd_setdir(state, tokens).await,
        "offer" => cmd_offer(state, tokens).await,
        "list" => cmd_list(state),
        "request" => cmd_request(state, tokens).await,
        "dereg" => cmd_dereg(state, tokens).await,
        other => report_error(format!("unknown command '{other}'")),
    }
}

async fn cmd_setdir(state: &Arc<PeerState>, tokens: &[String]) {
    let Some(path) = tokens.get(1) else {
        report_error("usage: setdir <path>");
        return;
    };

    // Open question resolution (SPEC_FULL §9): reject a second
    // `setdir` while any files are still offered, rather than silently
    // reshuffling an already-broadcast offerings view.
    if state.has_offered_files() {
        report_error("cannot change directory while files are still offered; dereg first");
        return;
    }

    let path_buf = std::path::PathBuf::from(path);
    if path_buf.is_dir() {
        state.bind_directory(path_buf);
        println!("Directory set to {path}");
    } else {
        report_error(format!("{path} is not a directory"));
    }
}

async fn cmd_offer(state: &Arc<PeerState>, tokens: &[String]) {
    let filenames: Vec<String> = tokens[1..].to_vec();
    if filenames.is_empty() {
        report_error("usage: offer <filename>...");
        return;
    }
    if state.directory().is_none() {
        report_error("offer requires a bound directory; run setdir first");
        return;
    }

    let msg = ControlMessage::Offer {
        filenames: filenames.clone(),
    };
    match send_with_ack(state, &msg, &state.offer_ack).await {
        Ok(true) => {
            state.add_offered_files(filenames);
            println!("Offer Message received by Server");
        }
        Ok(false) => {
            report_error("Server not responding");
            state.go_offline();
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to send offer");
            report_error("Server not responding");
        }
    }
}

fn cmd_list(state: &Arc<PeerState>) {
    let rows = state.cache_rows();
    if rows.is_empty() {
        println!("No files available for download at the moment.");
        return;
    }
    for (filename, owner) in rows {
        println!("{filename:<32}{owner:<16}");
    }
}

async fn cmd_request(state: &Arc<PeerState>, tokens: &[String]) {
    let (Some(filename), Some(owner)) = (tokens.get(1), tokens.get(2)) else {
        report_error("usage: request <filename> <owner>");
        return;
    };

    let Some((owner_host, owner_tcp_port)) = state.lookup(filename, owner) else {
        report_error("Invalid Request");
        return;
    };

    if let Err(e) = transfer::request_file(filename, owner_host, owner_tcp_port, owner).await {
        tracing::warn!(error = %e, "transfer failed");
        report_error(format!("transfer of {filename} failed"));
    }
}

async fn cmd_dereg(state: &Arc<PeerState>, tokens: &[String]) {
    let Some(name) = tokens.get(1) else {
        report_error("usage: dereg <name>");
        return;
    };

    let msg = ControlMessage::Dereg { name: name.clone() };
    match send_with_ack(state, &msg, &state.dereg_ack).await {
        Ok(true) => {
            println!("Dereg Message received by Server");
            state.go_offline();
        }
        Ok(false) => {
            report_error("Server not responding");
            state.go_offline();
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to send dereg");
            report_error("Server not responding");
            state.go_offline();
        }
    }
}
