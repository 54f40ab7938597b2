//! Public API for the `wireline` library.
//!
//! This crate provides the per-connection engine of a length-prefixed TCP
//! message transport: frame encoding and decoding, deadline control, and the
//! connection state machine driving a single request/response exchange. The
//! owning transport (acceptor, live set, payload codec) is the embedding
//! application's concern and talks to a connection through the
//! [`Transport`] trait.

pub mod codec;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod registry;
pub mod transport;

pub use codec::{FrameCodec, FrameError, LENGTH_HEADER_SIZE, MAX_MESSAGE_SIZE};
pub use config::TimingConfig;
pub use connection::{CloseHandle, Connection, ConnectionState, active_connection_count};
pub use deadline::DeadlineController;
pub use error::{StateError, TransportError};
pub use registry::ConnectionRegistry;
pub use transport::{ConnectionId, MessageInfo, Reply, Transport};
