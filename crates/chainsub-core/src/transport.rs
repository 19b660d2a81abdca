//! The `TransportAdapter` trait: the seam between the socket client and
//! whatever owns the physical WebSocket.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Close code reported when the transport gives up without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Events emitted by a transport, consumed sequentially by one reader.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection was (re-)established. Carries the handshake response headers.
    Connected { headers: HashMap<String, String> },
    /// The connection dropped. The adapter may reconnect on its own.
    Disconnected { reason: String, code: u16 },
    Text(String),
    Binary(Vec<u8>),
    /// A connect/send/receive error. Usually followed by `Disconnected`.
    Error(TransportError),
    /// The network path became usable (`true`) or unusable (`false`).
    ViabilityChanged(bool),
    /// The adapter believes a fresh connection would behave better.
    ReconnectSuggested(bool),
    /// The adapter stopped for good; no further events follow.
    Cancelled,
}

/// Receiving half of a transport's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A single physical WebSocket connection.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; `send_text` is called concurrently
/// from every caller of the socket client.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn TransportAdapter>`.
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    /// Connect to `url`, giving up after `timeout`, and return the event stream.
    async fn open(&self, url: &str, timeout: Duration) -> Result<TransportEvents, TransportError>;

    /// Enqueue a text frame. Must not wait for the network.
    fn send_text(&self, frame: String) -> Result<(), TransportError>;

    /// Called by the client once it has handled `Connected`, right before
    /// it re-sends its subscriptions.
    ///
    /// Adapters that reconnect on their own should reject `send_text` with
    /// [`TransportError::Reconnecting`] from the moment a connection drops
    /// until this call, so no frame reaches a new connection ahead of the
    /// re-subscription pass.
    fn resume(&self) {}

    /// Close the connection and stop reconnecting.
    fn close(&self);
}
