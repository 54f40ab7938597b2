//! Per-connection state machine for a single message exchange.
//!
//! A [`Connection`] owns one TCP socket and drives it through
//! connect → write → receive-size → receive-payload → dispatch → optional
//! response → close. The whole exchange runs as one linear async flow on the
//! task that calls [`send`][Connection::send] or
//! [`start_receiving`][Connection::start_receiving], so all callbacks for a
//! connection are serialised and never run concurrently with each other.
//!
//! A single deadline guards whichever phase is outstanding. When it expires
//! the socket is condemned; the interrupted phase observes the condemnation
//! *before* inspecting its own I/O result and therefore reports the timeout
//! variant of its error kind, whatever error the raced I/O carried. That
//! ordering is what lets one timer distinguish "too slow" from "something
//! else went wrong" without a cross-callback signal.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{FrameCodec, LENGTH_HEADER_SIZE},
    config::TimingConfig,
    deadline::DeadlineController,
    error::{StateError, TransportError},
    transport::{ConnectionId, MessageInfo, Transport},
};

/// Phase of the exchange a connection is currently in.
///
/// `Closed` is terminal and reachable from every other state on error,
/// timeout, explicit close, or normal completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed; no operation started yet.
    New,
    /// Outbound connect in flight.
    Connecting,
    /// Writing the staged frame.
    Writing,
    /// Reading the 4-byte length prefix.
    ReceivingSize,
    /// Reading the payload announced by the prefix.
    ReceivingPayload,
    /// Payload delivered to the application callback.
    Dispatched,
    /// Socket closed and the transport notified.
    Closed,
}

/// One TCP session: a single request/response exchange, or a single inbound
/// receive optionally followed by one response.
///
/// A connection is not reused for a second independent message; after the
/// exchange completes (or fails) it closes, reports to the owning
/// [`Transport`], and rejects further operations with [`StateError`].
pub struct Connection {
    id: ConnectionId,
    remote: Option<SocketAddr>,
    socket: Option<TcpStream>,
    buffer: BytesMut,
    response_timeout: Option<Duration>,
    state: ConnectionState,
    deadline: DeadlineController,
    timing: TimingConfig,
    codec: FrameCodec,
    transport: Arc<dyn Transport>,
    active: Option<ActiveConnection>,
}

impl Connection {
    /// Create a connection that will dial `remote` on its first
    /// [`send`][Self::send].
    #[must_use]
    pub fn outbound(remote: SocketAddr, transport: Arc<dyn Transport>) -> Self {
        Self::new(Some(remote), None, transport)
    }

    /// Wrap an already-accepted socket.
    ///
    /// The owning transport completes its accept wiring, then calls
    /// [`start_receiving`][Self::start_receiving].
    #[must_use]
    pub fn inbound(socket: TcpStream, transport: Arc<dyn Transport>) -> Self {
        let remote = socket.peer_addr().ok();
        Self::new(remote, Some(socket), transport)
    }

    fn new(
        remote: Option<SocketAddr>,
        socket: Option<TcpStream>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let id = ConnectionId::next();
        let active = ActiveConnection::new();
        info!(
            "connection opened: active={}, id={id}, peer={remote:?}",
            active_connection_count(),
        );
        Self {
            id,
            remote,
            socket,
            buffer: BytesMut::new(),
            response_timeout: None,
            state: ConnectionState::New,
            deadline: DeadlineController::new(),
            timing: TimingConfig::default(),
            codec: FrameCodec::default(),
            transport,
            active: Some(active),
        }
    }

    /// Replace the timing configuration.
    #[must_use]
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Replace the frame codec.
    #[must_use]
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Current phase of the exchange.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.state }

    /// The underlying socket, if connected.
    #[must_use]
    pub fn socket(&self) -> Option<&TcpStream> { self.socket.as_ref() }

    /// Mutable access to the underlying socket, for accept-time wiring.
    #[must_use]
    pub fn socket_mut(&mut self) -> Option<&mut TcpStream> { self.socket.as_mut() }

    /// Handle that condemns this connection's socket from outside the
    /// exchange, e.g. on transport shutdown.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            id: self.id,
            condemned: self.deadline.watch(),
        }
    }

    /// Send `payload` as one frame and run the exchange to completion.
    ///
    /// With `is_response == false` the connection dials `remote` first; the
    /// socket must not already be open. With `is_response == true` the frame
    /// is a reply on an already-open (inbound) socket. `timeout` is the
    /// deadline for the *next* receive phase; `None` means no further
    /// response is expected and the connection closes once the frame is
    /// written.
    ///
    /// Runtime failures are reported through [`Transport::on_error`] and the
    /// call returns `Ok(())`. An oversized payload is reported without any
    /// socket or timer side effect.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] when the socket precondition does not hold
    /// or the connection already completed its exchange. Nothing is executed
    /// or reported in that case.
    pub async fn send(
        &mut self,
        payload: &[u8],
        timeout: Option<Duration>,
        is_response: bool,
    ) -> Result<(), StateError> {
        if self.state == ConnectionState::Closed {
            return Err(StateError::AlreadyClosed);
        }
        if is_response && self.socket.is_none() {
            return Err(StateError::SocketNotOpen);
        }
        if !is_response && self.socket.is_some() {
            return Err(StateError::SocketAlreadyOpen);
        }

        if self.stage_frame(payload).is_err() {
            warn!(
                "message of {} bytes exceeds limit of {}: id={}",
                payload.len(),
                self.codec.max_payload(),
                self.id,
            );
            self.report(TransportError::MessageSizeTooLarge);
            return Ok(());
        }
        self.response_timeout = timeout;

        if is_response {
            self.deadline.arm(self.timing.write_deadline(payload.len()));
            self.state = ConnectionState::Writing;
        } else {
            self.deadline.arm(self.timing.initial_timeout);
            self.state = ConnectionState::Connecting;
        }
        self.run().await;
        Ok(())
    }

    /// Receive one frame on an inbound socket and run the exchange to
    /// completion, including any reply the application callback produces.
    ///
    /// The receive window uses the default initial deadline.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] when the socket is not open or the
    /// connection already completed its exchange.
    pub async fn start_receiving(&mut self) -> Result<(), StateError> {
        if self.state == ConnectionState::Closed {
            return Err(StateError::AlreadyClosed);
        }
        if self.socket.is_none() {
            return Err(StateError::SocketNotOpen);
        }

        self.buffer.resize(LENGTH_HEADER_SIZE, 0);
        self.deadline.arm(self.timing.initial_timeout);
        self.state = ConnectionState::ReceivingSize;
        self.run().await;
        Ok(())
    }

    /// Close the socket, cancel any pending deadline, and notify the owning
    /// transport.
    ///
    /// Idempotent: the transport is notified exactly once however many times
    /// this is called.
    pub fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.deadline.cancel();
        self.socket = None;
        self.state = ConnectionState::Closed;
        info!("connection closed: id={}, peer={:?}", self.id, self.remote);
        self.transport.remove_connection(self.id);
        drop(active);
    }

    /// Drive the state machine until the exchange completes or fails, then
    /// report and close.
    async fn run(&mut self) {
        match self.drive().await {
            Ok(()) => debug!("exchange complete: id={}", self.id),
            Err(error) => {
                warn!("connection failed: id={}, error={error}", self.id);
                self.report(error);
            }
        }
        self.close();
    }

    async fn drive(&mut self) -> Result<(), TransportError> {
        loop {
            match self.state {
                ConnectionState::Connecting => {
                    self.connect_phase().await?;
                    let deadline = self.timing.write_deadline(self.staged_payload_len());
                    self.deadline.arm(deadline);
                    self.state = ConnectionState::Writing;
                }
                ConnectionState::Writing => {
                    self.write_phase().await?;
                    #[cfg(feature = "metrics")]
                    crate::metrics::inc_messages(crate::metrics::Direction::Outbound);
                    match self.response_timeout.take() {
                        Some(timeout) => {
                            self.buffer.resize(LENGTH_HEADER_SIZE, 0);
                            self.deadline.arm(timeout);
                            self.state = ConnectionState::ReceivingSize;
                        }
                        // A fire-and-forget response: nothing further expected.
                        None => return Ok(()),
                    }
                }
                ConnectionState::ReceivingSize => {
                    let len = self.read_size_phase().await?;
                    self.buffer.resize(len, 0);
                    // The deadline stays armed: prefix and payload share one window.
                    self.state = ConnectionState::ReceivingPayload;
                }
                ConnectionState::ReceivingPayload => {
                    self.read_payload_phase().await?;
                    self.deadline.cancel();
                    #[cfg(feature = "metrics")]
                    crate::metrics::inc_messages(crate::metrics::Direction::Inbound);
                    self.state = ConnectionState::Dispatched;
                }
                ConnectionState::Dispatched => {
                    if self.dispatch_phase().await? {
                        self.state = ConnectionState::Writing;
                    } else {
                        return Ok(());
                    }
                }
                ConnectionState::New | ConnectionState::Closed => {
                    debug_assert!(false, "drive entered without a staged operation");
                    return Ok(());
                }
            }
        }
    }

    async fn connect_phase(&mut self) -> Result<(), TransportError> {
        debug_assert_eq!(self.state, ConnectionState::Connecting);
        let Some(remote) = self.remote else {
            return Err(TransportError::SendFailure);
        };
        let condemned = self.deadline.watch();
        let outcome = tokio::select! {
            biased;
            () = condemned.cancelled() => None,
            res = TcpStream::connect(remote) => Some(res),
        };
        let stream = self.classify(outcome, TransportError::SendTimeout, TransportError::SendFailure)?;
        self.socket = Some(stream);
        debug!("connected: id={}, peer={remote}", self.id);
        Ok(())
    }

    async fn write_phase(&mut self) -> Result<(), TransportError> {
        debug_assert_eq!(self.state, ConnectionState::Writing);
        let Some(socket) = self.socket.as_mut() else {
            return Err(TransportError::SendFailure);
        };
        let condemned = self.deadline.watch();
        let outcome = tokio::select! {
            biased;
            () = condemned.cancelled() => None,
            res = socket.write_all(&self.buffer) => Some(res),
        };
        self.classify(outcome, TransportError::SendTimeout, TransportError::SendFailure)
    }

    async fn read_size_phase(&mut self) -> Result<usize, TransportError> {
        debug_assert_eq!(self.state, ConnectionState::ReceivingSize);
        debug_assert_eq!(self.buffer.len(), LENGTH_HEADER_SIZE);
        let Some(socket) = self.socket.as_mut() else {
            return Err(TransportError::ReceiveFailure);
        };
        let condemned = self.deadline.watch();
        let outcome = tokio::select! {
            biased;
            () = condemned.cancelled() => None,
            res = socket.read_exact(&mut self.buffer[..]) => Some(res),
        };
        self.classify(outcome, TransportError::ReceiveTimeout, TransportError::ReceiveFailure)?;

        let mut header = [0u8; LENGTH_HEADER_SIZE];
        header.copy_from_slice(&self.buffer);
        match self.codec.decode_len(header) {
            Ok(len) => Ok(len),
            Err(error) => {
                warn!("rejecting inbound frame: id={}, error={error}", self.id);
                Err(TransportError::ReceiveFailure)
            }
        }
    }

    async fn read_payload_phase(&mut self) -> Result<(), TransportError> {
        debug_assert_eq!(self.state, ConnectionState::ReceivingPayload);
        let Some(socket) = self.socket.as_mut() else {
            return Err(TransportError::ReceiveFailure);
        };
        let condemned = self.deadline.watch();
        let outcome = tokio::select! {
            biased;
            () = condemned.cancelled() => None,
            res = socket.read_exact(&mut self.buffer[..]) => Some(res),
        };
        self.classify(outcome, TransportError::ReceiveTimeout, TransportError::ReceiveFailure)
            .map(|_| ())
    }

    /// Deliver the received payload; returns `true` when a reply was staged
    /// and the exchange re-enters the write path.
    async fn dispatch_phase(&mut self) -> Result<bool, TransportError> {
        debug_assert_eq!(self.state, ConnectionState::Dispatched);
        let payload = self.buffer.split().freeze();
        let info = self.message_info();
        debug!("message received: id={}, len={}", self.id, payload.len());
        let reply = self.transport.on_message_received(payload, info).await;
        let Some(reply) = reply.filter(|reply| !reply.payload.is_empty()) else {
            return Ok(false);
        };

        if self.stage_frame(&reply.payload).is_err() {
            warn!(
                "reply of {} bytes exceeds limit of {}: id={}",
                reply.payload.len(),
                self.codec.max_payload(),
                self.id,
            );
            return Err(TransportError::MessageSizeTooLarge);
        }
        self.response_timeout = reply.timeout;
        self.deadline.arm(self.timing.write_deadline(reply.payload.len()));
        Ok(true)
    }

    /// Attribute a phase completion.
    ///
    /// The condemned check precedes the error check: a deadline expiry (or
    /// external close) condemns the socket, and any I/O completion observed
    /// after that must read as the timeout variant whatever error code it
    /// carries.
    fn classify<T>(
        &self,
        outcome: Option<io::Result<T>>,
        timeout: TransportError,
        failure: TransportError,
    ) -> Result<T, TransportError> {
        if self.deadline.fired() {
            return Err(timeout);
        }
        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => {
                debug!("socket error: id={}, error={error}", self.id);
                Err(failure)
            }
            None => Err(timeout),
        }
    }

    fn stage_frame(&mut self, payload: &[u8]) -> Result<(), crate::codec::FrameError> {
        self.buffer.clear();
        self.codec.encode(payload, &mut self.buffer)
    }

    fn staged_payload_len(&self) -> usize { self.buffer.len().saturating_sub(LENGTH_HEADER_SIZE) }

    fn message_info(&self) -> MessageInfo {
        let peer = self
            .socket
            .as_ref()
            .and_then(|socket| socket.peer_addr().ok())
            .or(self.remote);
        let local = self
            .socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok());
        MessageInfo { peer, local }
    }

    fn report(&self, error: TransportError) {
        #[cfg(feature = "metrics")]
        crate::metrics::inc_errors();
        self.transport.on_error(error);
    }
}

/// Condemns a connection's socket from outside the exchange.
///
/// Cheap to clone and safe to hold after the connection is gone. Closing
/// through the handle condemns the socket the same way a deadline expiry
/// does, so an interrupted exchange reports the timeout variant of its
/// current phase.
#[derive(Clone, Debug)]
pub struct CloseHandle {
    id: ConnectionId,
    condemned: CancellationToken,
}

impl CloseHandle {
    /// Identifier of the connection this handle condemns.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Condemn the socket. In-flight I/O completes at its next suspension
    /// point and is attributed as a timeout.
    pub fn close(&self) { self.condemned.cancel(); }

    /// Whether the connection has been condemned.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.condemned.is_cancelled() }
}

static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// RAII guard tracking the process-wide count of live connections.
struct ActiveConnection;

impl ActiveConnection {
    fn new() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::dec_connections();
    }
}

/// Current number of connections that have not yet closed.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }
