//! chainsub-ws: pub/sub multiplexer over a JSON-RPC WebSocket.
//!
//! # Features
//! - Many logical subscriptions (account, program, signature, logs) on one connection
//! - Request/ack/notification correlation via a dual-indexed registry
//! - Auto-reconnect (exponential backoff) and transparent re-subscription
//! - Delegate held weakly; `stop()` releases it

pub mod client;
pub mod config;
pub mod delegate;
pub mod registry;
pub mod transport;

pub use client::SocketClient;
pub use config::SocketConfig;
pub use delegate::{DelegateSlot, SocketDelegate};
pub use registry::{NotificationCallback, RequestKind, SubscriptionRegistry};
pub use transport::WsTransport;
