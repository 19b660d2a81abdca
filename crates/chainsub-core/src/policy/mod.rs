//! Connection policies.
//!
//! Only reconnect backoff lives here for now; the WebSocket transport
//! consults it between connection attempts.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
