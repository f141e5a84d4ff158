//! Typed protocol errors the caller branches on.
//!
//! Everything else (socket bind failures, file I/O) propagates as
//! `anyhow::Error` with `.context(..)` attached at the call site.

use thiserror::Error;

/// A datagram that failed to decode as a [`crate::wire::ControlMessage`].
///
/// Per the protocol, malformed datagrams are logged and dropped, never
/// surfaced to a user — this type exists so the decode call site can
/// tell "dropped, keep reading" apart from a real I/O error.
#[derive(Debug, Error)]
#[error("malformed datagram")]
pub struct Malformed;
