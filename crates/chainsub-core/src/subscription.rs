//! Client-side subscription identity and lifecycle state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Server-issued subscription handle, valid for one connection only.
pub type SocketHandle = u64;

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Client-generated subscription id, handed to the caller synchronously.
///
/// Ids come from a process-wide counter and are never reused, even after
/// the subscription is closed or the connection is re-established.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub String);

impl LocalId {
    /// Allocate the next unused id (`"L1"`, `"L2"`, ...).
    pub fn next() -> Self {
        let n = NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("L{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LocalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LocalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a logical subscription.
///
/// ```text
/// Pending ──ack──▶ Active ──unsubscribe──▶ Unsubscribing ──ack──▶ Closed
///    │                │
///    └─failure──▶ Closed   (reconnect: Active → Pending)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Subscribe request sent (or waiting to be re-sent), no handle yet.
    Pending,
    /// Acknowledged; notifications for its handle are delivered.
    Active,
    /// Unsubscribe request in flight.
    Unsubscribing,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Unsubscribing => write!(f, "unsubscribing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
