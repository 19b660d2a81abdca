//! chainsub-core: foundation types for ChainSub.
//!
//! # Overview
//!
//! ChainSub multiplexes many logical pub/sub subscriptions (account,
//! program, signature, logs) over one JSON-RPC WebSocket connection. The
//! core crate defines:
//!
//! - [`request`]: JSON-RPC wire types and the frame codec ([`encode`], [`decode`])
//! - [`method`]: subscription kinds, method names, static request configuration
//! - [`subscription`]: [`LocalId`] and the [`SubscriptionState`] lifecycle
//! - [`TransportAdapter`]: the trait every WebSocket transport implements
//! - [`SocketError`] / [`TransportError`]: structured error types
//! - [`policy`] module: reconnect backoff

pub mod error;
pub mod method;
pub mod policy;
pub mod request;
pub mod subscription;
pub mod transport;

pub use error::{SocketError, TransportError};
pub use method::{LogsFilter, SocketMethod, SubscriptionKind};
pub use request::{decode, decode_bytes, encode, encode_with_id, DecodedFrame, JsonRpcError, RequestId};
pub use subscription::{LocalId, SocketHandle, SubscriptionState};
pub use transport::{TransportAdapter, TransportEvent, TransportEvents};
