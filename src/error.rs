//! Error taxonomy for the transport engine.
//!
//! Every [`TransportError`] is terminal for the connection that reports it;
//! none are retried internally. [`StateError`] flags misuse of the connection
//! API rather than a runtime failure.

use thiserror::Error;

/// Terminal outcome reported to the owning transport via `on_error`.
///
/// A connection surfaces at most one of these per exchange, after which it
/// closes and removes itself from the transport's live set.
/// [`MessageSizeTooLarge`][Self::MessageSizeTooLarge] on an initial send is
/// the only variant raised without any socket or timer side effect.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The deadline expired while waiting for data from the peer.
    #[error("timed out receiving from the peer")]
    ReceiveTimeout,
    /// Reading from the socket failed, or the peer sent an unacceptable
    /// length prefix.
    #[error("receiving from the peer failed")]
    ReceiveFailure,
    /// The deadline expired while connecting or writing.
    #[error("timed out sending to the peer")]
    SendTimeout,
    /// Connecting to the peer or writing to the socket failed.
    #[error("sending to the peer failed")]
    SendFailure,
    /// The payload exceeds the maximum transportable size.
    #[error("message exceeds the maximum transport size")]
    MessageSizeTooLarge,
}

/// Contract violation on the connection API.
///
/// These are programming errors in the caller, reported instead of executing
/// an operation whose precondition does not hold. No I/O is performed and
/// nothing is reported through the transport callbacks.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// An initial send requires a socket that has not been connected yet.
    #[error("initial send requires an unconnected socket")]
    SocketAlreadyOpen,
    /// A response send or a receive requires an open socket.
    #[error("operation requires an open socket")]
    SocketNotOpen,
    /// The connection has already completed its single exchange.
    #[error("connection is closed")]
    AlreadyClosed,
}
