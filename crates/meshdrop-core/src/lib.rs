//! meshdrop-core — shared wire types and framing for the meshdrop
//! registry/peer protocol.
//!
//! Two independent wire formats live here:
//!
//! - [`wire`] — the control-plane datagram envelope exchanged between
//!   peers and the registry (REGISTER/TABLE/OFFER/DEREG and their acks).
//! - [`framing`] — the line + length-prefix framing used by the direct
//!   peer-to-peer file transfer stream. It has nothing to do with the
//!   registry, but lives alongside `wire` because both sides of a
//!   transfer (client and server) need the exact same framing and
//!   neither owns the other.

pub mod error;
pub mod framing;
pub mod wire;
