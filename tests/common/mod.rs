//! Shared helpers for connection integration tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use wireline::{ConnectionId, MessageInfo, Reply, Transport, TransportError};

/// Transport double recording every callback a connection makes.
pub struct RecordingTransport {
    errors: Mutex<Vec<TransportError>>,
    messages: Mutex<Vec<Bytes>>,
    last_info: Mutex<Option<MessageInfo>>,
    removed: AtomicUsize,
    reply: Mutex<Option<Reply>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> { Self::build(None) }

    /// A transport whose first dispatched message produces `reply`.
    pub fn with_reply(reply: Reply) -> Arc<Self> { Self::build(Some(reply)) }

    fn build(reply: Option<Reply>) -> Arc<Self> {
        Arc::new(Self {
            errors: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            last_info: Mutex::new(None),
            removed: AtomicUsize::new(0),
            reply: Mutex::new(reply),
        })
    }

    pub fn errors(&self) -> Vec<TransportError> { self.errors.lock().unwrap().clone() }

    pub fn messages(&self) -> Vec<Bytes> { self.messages.lock().unwrap().clone() }

    pub fn removed_count(&self) -> usize { self.removed.load(Ordering::SeqCst) }

    pub fn last_info(&self) -> Option<MessageInfo> { *self.last_info.lock().unwrap() }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn remove_connection(&self, _id: ConnectionId) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: TransportError) { self.errors.lock().unwrap().push(error); }

    async fn on_message_received(&self, payload: Bytes, info: MessageInfo) -> Option<Reply> {
        self.messages.lock().unwrap().push(payload);
        *self.last_info.lock().unwrap() = Some(info);
        self.reply.lock().unwrap().take()
    }
}

/// A length-prefixed frame as raw bytes, for driving a peer by hand.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = u32::try_from(payload.len()).unwrap().to_be_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Connected loopback socket pair.
pub async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

/// Install a subscriber so `log`/`tracing` output is visible under
/// `--nocapture`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
