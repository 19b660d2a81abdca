//! Delegate interface and the non-owning slot the client keeps it in.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;

use chainsub_core::error::SocketError;
use chainsub_core::subscription::{LocalId, SocketHandle};

/// Receives connection lifecycle events, acks and notifications.
///
/// Called from the client's dispatch task; implementations should return
/// quickly and hand heavy work off elsewhere.
pub trait SocketDelegate: Send + Sync {
    fn connected(&self);
    fn subscribed(&self, handle: SocketHandle, id: &LocalId);
    fn unsubscribed(&self, id: &LocalId);
    fn account_notification(&self, id: &LocalId, payload: Value);
    fn program_notification(&self, id: &LocalId, payload: Value);
    fn signature_notification(&self, id: &LocalId, payload: Value);
    fn logs_notification(&self, id: &LocalId, payload: Value);
    fn disconnected(&self, reason: &str, code: u16);
    fn error(&self, error: &SocketError);
}

/// Shared, weak reference to the delegate.
///
/// The client never keeps the delegate alive; once the caller drops it,
/// events are discarded.
#[derive(Clone, Default)]
pub struct DelegateSlot {
    inner: Arc<RwLock<Option<Weak<dyn SocketDelegate>>>>,
}

impl DelegateSlot {
    pub fn set(&self, delegate: &Arc<dyn SocketDelegate>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(delegate));
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Upgrade to a strong reference for the duration of one callback.
    pub fn get(&self) -> Option<Arc<dyn SocketDelegate>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Run `f` against the delegate if one is still alive.
    pub fn with(&self, f: impl FnOnce(&dyn SocketDelegate)) {
        if let Some(delegate) = self.get() {
            f(delegate.as_ref());
        }
    }
}

impl std::fmt::Debug for DelegateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateSlot")
            .field("attached", &self.get().is_some())
            .finish()
    }
}
