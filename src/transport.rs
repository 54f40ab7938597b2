//! Collaborator boundary between a connection and its owning transport.
//!
//! [`Transport`] is the contract a connection consumes: live-set removal,
//! terminal error reports, and delivery of fully received messages. The
//! transport itself (acceptor, retry policy, payload codec) lives outside
//! this crate.

use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier from the process-wide counter.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Socket-level metadata delivered with a received message.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageInfo {
    /// Address of the remote peer, when known.
    pub peer: Option<SocketAddr>,
    /// Local address of the receiving socket, when known.
    pub local: Option<SocketAddr>,
}

/// Reply produced by the application callback for a received message.
#[derive(Clone, Debug)]
pub struct Reply {
    /// Payload to send back over the already-open socket.
    pub payload: Bytes,
    /// Deadline for a further response from the peer, or `None` when the
    /// reply is fire-and-forget and the connection closes once it is
    /// written.
    pub timeout: Option<Duration>,
}

impl Reply {
    /// A reply that expects nothing further from the peer.
    #[must_use]
    pub fn fire_and_forget(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            timeout: None,
        }
    }
}

/// Callbacks a connection invokes on its owning transport.
///
/// Reports are exact-once: a terminal error is surfaced through
/// [`on_error`][Self::on_error] exactly once per connection, and a message
/// is either delivered whole to
/// [`on_message_received`][Self::on_message_received] or not reported at
/// all. Within one connection the callbacks are serialised on the driving
/// task and never run concurrently with each other.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Drop the connection from the live set. Invoked exactly once, from
    /// [`Connection::close`][crate::connection::Connection::close].
    fn remove_connection(&self, id: ConnectionId);

    /// Report a terminal error for the connection.
    fn on_error(&self, error: TransportError);

    /// Deliver a fully received message.
    ///
    /// Returning a [`Reply`] with a non-empty payload sends it back over the
    /// same socket; `None` or an empty payload closes the connection.
    async fn on_message_received(&self, payload: Bytes, info: MessageInfo) -> Option<Reply>;
}
