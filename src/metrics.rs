//! Metric helpers for `wireline`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. It is compiled only with the
//! `metrics` feature; installing an exporter is the embedding application's
//! concern.

use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "wireline_connections_active";
/// Name of the counter tracking completed message transfers.
pub const MESSAGES_TOTAL: &str = "wireline_messages_total";
/// Name of the counter tracking terminal connection errors.
pub const ERRORS_TOTAL: &str = "wireline_errors_total";

/// Direction of a message transfer.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Message received from the peer.
    Inbound,
    /// Message written to the peer.
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() { gauge!(CONNECTIONS_ACTIVE).increment(1.0); }

/// Decrement the active connections gauge.
pub fn dec_connections() { gauge!(CONNECTIONS_ACTIVE).decrement(1.0); }

/// Record a completed transfer for the given direction.
pub fn inc_messages(direction: Direction) {
    counter!(MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
}

/// Record a terminal connection error.
pub fn inc_errors() { counter!(ERRORS_TOTAL).increment(1); }
