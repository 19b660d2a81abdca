//! Transport-level and client-level error types.

use thiserror::Error;

use crate::method::SubscriptionKind;
use crate::request::{JsonRpcError, RequestId};
use crate::subscription::{LocalId, SubscriptionState};

/// Errors raised by a transport adapter (connect, send, receive).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connecting took longer than the configured timeout.
    #[error("Connect timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The transport is closed (never opened, or closed by `close()`).
    #[error("Transport closed")]
    Closed,

    /// The connection dropped and the client has not yet re-registered
    /// its subscriptions on the new one.
    #[error("Transport is reconnecting")]
    Reconnecting,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if reconnecting may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::Timeout { .. } | Self::Reconnecting)
    }
}

/// Errors surfaced by the socket client and the subscription registry.
///
/// Per-call errors are returned to the caller; connection-level errors
/// reach the delegate's `error` callback. None of them is fatal to the process.
#[derive(Debug, Error)]
pub enum SocketError {
    /// No live connection; retry once the delegate reports `connected`.
    #[error("socket is disconnected")]
    Disconnected,

    /// The request payload could not be encoded.
    #[error("could not serialize request: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// The local id was never issued, or its subscription is closed.
    #[error("unknown subscription {0}")]
    UnknownSubscription(LocalId),

    /// The subscription is in the wrong state for the requested operation
    /// (e.g. unsubscribing while it is still pending).
    #[error("subscription {id} is {state}")]
    NotActive { id: LocalId, state: SubscriptionState },

    /// A kind-specific unsubscribe was called with an id of another kind.
    #[error("subscription {id} is a {actual} subscription, not {expected}")]
    KindMismatch {
        id: LocalId,
        expected: SubscriptionKind,
        actual: SubscriptionKind,
    },

    /// An ack arrived for a request id the registry no longer tracks.
    #[error("no pending request with id {0}")]
    UnmatchedRequestId(RequestId),

    /// The server answered with an error-shaped response.
    #[error("server rejected request: {0}")]
    ServerRejected(JsonRpcError),

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The transport failed to connect or send.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),
}
