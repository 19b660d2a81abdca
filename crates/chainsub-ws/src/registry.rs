//! Subscription registry.
//!
//! Tracks every logical subscription through `Pending → Active →
//! Unsubscribing → Closed` and resolves it by two keys: the outbound request
//! id while an ack is awaited, and the server-issued handle once active.
//! Closed subscriptions are removed; a closed id reports `UnknownSubscription`.
//!
//! Subscribe frames are handed to the transport from inside the critical
//! section that records them, so a caller's subscribe and the reconnect
//! re-subscription pass are strictly ordered: every live entry has exactly
//! one outstanding subscribe request, on exactly one connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use chainsub_core::error::SocketError;
use chainsub_core::method::SubscriptionKind;
use chainsub_core::request::{next_request_id, RequestId};
use chainsub_core::subscription::{LocalId, SocketHandle, SubscriptionState};

/// Handler bound to a subscription at subscribe time.
pub type NotificationCallback = Arc<dyn Fn(&LocalId, Value) + Send + Sync>;

/// Which operation an outstanding request id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
}

/// Result of a successful subscribe ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
    pub local_id: LocalId,
    /// `true` if the subscription had been acked on an earlier connection.
    pub resubscribed: bool,
}

/// A subscription that must be sent again on a fresh connection.
#[derive(Clone)]
pub struct Resubscribe {
    pub local_id: LocalId,
    pub kind: SubscriptionKind,
    pub params: Vec<Value>,
    pub callback: NotificationCallback,
}

impl std::fmt::Debug for Resubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resubscribe")
            .field("local_id", &self.local_id)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

/// Outcome of resetting the registry for a new connection.
#[derive(Debug, Default)]
pub struct Resubscription {
    /// Reset to `Pending` and re-sent under a fresh request id.
    pub pending: Vec<Resubscribe>,
    /// Reset to `Pending` but the frame could not be sent; retried on the
    /// next connection.
    pub unsent: Vec<(LocalId, SocketError)>,
    /// Were `Unsubscribing` when the connection died; now closed.
    pub closed: Vec<LocalId>,
}

struct SubscriptionEntry {
    kind: SubscriptionKind,
    params: Vec<Value>,
    state: SubscriptionState,
    request_id: Option<RequestId>,
    handle: Option<SocketHandle>,
    callback: NotificationCallback,
    acked_before: bool,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<LocalId, SubscriptionEntry>,
    by_request: HashMap<RequestId, (LocalId, RequestKind)>,
    by_handle: HashMap<SocketHandle, LocalId>,
}

impl RegistryInner {
    fn attach_subscribe(&mut self, local_id: &LocalId, request_id: RequestId) {
        if let Some(entry) = self.entries.get_mut(local_id) {
            entry.request_id = Some(request_id);
            self.by_request
                .insert(request_id, (local_id.clone(), RequestKind::Subscribe));
        }
    }

    /// Remove the subscription owning `request_id` if that request is of `expected` kind.
    fn close_by_request(&mut self, request_id: RequestId, expected: RequestKind) -> Result<LocalId, SocketError> {
        match self.by_request.get(&request_id) {
            Some((_, kind)) if *kind == expected => {}
            _ => return Err(SocketError::UnmatchedRequestId(request_id)),
        }
        let (local_id, _) = self
            .by_request
            .remove(&request_id)
            .ok_or(SocketError::UnmatchedRequestId(request_id))?;
        self.remove_entry(&local_id);
        Ok(local_id)
    }

    fn remove_entry(&mut self, local_id: &LocalId) -> Option<SubscriptionEntry> {
        let entry = self.entries.remove(local_id)?;
        if let Some(request_id) = entry.request_id {
            self.by_request.remove(&request_id);
        }
        if let Some(handle) = entry.handle {
            if self.by_handle.get(&handle) == Some(local_id) {
                self.by_handle.remove(&handle);
            }
        }
        Some(entry)
    }
}

/// Thread-safe registry shared between callers and the inbound dispatch path.
///
/// Every operation is one short critical section. Notification callbacks
/// run after the lock is released; only the non-blocking `send` closures of
/// [`register_pending`](Self::register_pending) and
/// [`all_for_resubscription`](Self::all_for_resubscription) run under it.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new `Pending` subscription and hand its subscribe request to `send`.
    ///
    /// The local id and request id are allocated, `send` is called and the
    /// entry is recorded in one critical section. `send` must only enqueue
    /// the frame. If it fails nothing is recorded and its error is returned.
    pub fn register_pending(
        &self,
        kind: SubscriptionKind,
        params: Vec<Value>,
        callback: NotificationCallback,
        send: impl FnOnce(RequestId) -> Result<(), SocketError>,
    ) -> Result<LocalId, SocketError> {
        let mut inner = self.lock();
        let request_id = next_request_id();
        send(request_id)?;

        let local_id = LocalId::next();
        inner.entries.insert(
            local_id.clone(),
            SubscriptionEntry {
                kind,
                params,
                state: SubscriptionState::Pending,
                request_id: None,
                handle: None,
                callback,
                acked_before: false,
            },
        );
        inner.attach_subscribe(&local_id, request_id);
        tracing::debug!(local_id = %local_id, %kind, request_id, "registered pending subscription");
        Ok(local_id)
    }

    /// Which operation `request_id` was issued for, if it is still outstanding.
    pub fn request_kind(&self, request_id: RequestId) -> Option<RequestKind> {
        self.lock().by_request.get(&request_id).map(|(_, kind)| *kind)
    }

    /// Kind of a live subscription.
    pub fn kind(&self, local_id: &LocalId) -> Option<SubscriptionKind> {
        self.lock().entries.get(local_id).map(|e| e.kind)
    }

    /// Mark the subscription waiting on `request_id` as `Active` under `handle`.
    pub fn resolve_subscribe_ack(
        &self,
        request_id: RequestId,
        handle: SocketHandle,
    ) -> Result<SubscribeAck, SocketError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let local_id = match inner.by_request.get(&request_id) {
            Some((id, RequestKind::Subscribe)) => id.clone(),
            _ => return Err(SocketError::UnmatchedRequestId(request_id)),
        };
        inner.by_request.remove(&request_id);

        let entry = inner
            .entries
            .get_mut(&local_id)
            .filter(|e| e.request_id == Some(request_id) && e.state == SubscriptionState::Pending)
            .ok_or(SocketError::UnmatchedRequestId(request_id))?;

        entry.state = SubscriptionState::Active;
        entry.request_id = None;
        entry.handle = Some(handle);
        let resubscribed = entry.acked_before;
        entry.acked_before = true;

        if let Some(previous) = inner.by_handle.insert(handle, local_id.clone()) {
            if previous != local_id {
                tracing::warn!(handle, previous = %previous, local_id = %local_id, "server reused an active handle");
                if let Some(stale) = inner.entries.get_mut(&previous) {
                    stale.handle = None;
                }
            }
        }

        Ok(SubscribeAck { local_id, resubscribed })
    }

    /// Close the subscription whose subscribe request failed.
    ///
    /// Returns the closed id together with `reason` for the error path.
    pub fn resolve_subscribe_failure(
        &self,
        request_id: RequestId,
        reason: SocketError,
    ) -> Result<(LocalId, SocketError), SocketError> {
        let local_id = self.lock().close_by_request(request_id, RequestKind::Subscribe)?;
        tracing::debug!(local_id = %local_id, request_id, error = %reason, "subscribe failed");
        Ok((local_id, reason))
    }

    /// Move an `Active` subscription to `Unsubscribing`.
    ///
    /// Returns the handle to unsubscribe and the request id to send it under.
    pub fn begin_unsubscribe(&self, local_id: &LocalId) -> Result<(SocketHandle, RequestId), SocketError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let entry = inner
            .entries
            .get_mut(local_id)
            .ok_or_else(|| SocketError::UnknownSubscription(local_id.clone()))?;

        let handle = match (entry.state, entry.handle) {
            (SubscriptionState::Active, Some(handle)) if entry.request_id.is_none() => handle,
            (state, _) => {
                return Err(SocketError::NotActive {
                    id: local_id.clone(),
                    state,
                })
            }
        };

        let request_id = next_request_id();
        entry.state = SubscriptionState::Unsubscribing;
        entry.request_id = Some(request_id);
        inner
            .by_request
            .insert(request_id, (local_id.clone(), RequestKind::Unsubscribe));
        Ok((handle, request_id))
    }

    /// Undo [`begin_unsubscribe`](Self::begin_unsubscribe) when the frame could not be sent.
    pub fn abort_unsubscribe(&self, local_id: &LocalId) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if let Some(entry) = inner.entries.get_mut(local_id) {
            if entry.state == SubscriptionState::Unsubscribing {
                if let Some(request_id) = entry.request_id.take() {
                    inner.by_request.remove(&request_id);
                }
                entry.state = SubscriptionState::Active;
            }
        }
    }

    /// Close the subscription whose unsubscribe request was acknowledged.
    pub fn resolve_unsubscribe_ack(&self, request_id: RequestId) -> Result<LocalId, SocketError> {
        self.lock().close_by_request(request_id, RequestKind::Unsubscribe)
    }

    /// Close the subscription whose unsubscribe request the server refused.
    ///
    /// The handle can no longer be trusted either way, so the subscription
    /// is closed just like on success.
    pub fn resolve_unsubscribe_failure(&self, request_id: RequestId) -> Result<LocalId, SocketError> {
        self.lock().close_by_request(request_id, RequestKind::Unsubscribe)
    }

    /// Deliver a notification to the `Active` subscription holding `handle`.
    ///
    /// Returns `false` if nothing matched; stale handles are expected after
    /// an unsubscribe or reconnect race and are dropped silently.
    pub fn dispatch_notification(&self, kind: SubscriptionKind, handle: SocketHandle, payload: Value) -> bool {
        let target = {
            let inner = self.lock();
            inner.by_handle.get(&handle).and_then(|local_id| {
                let entry = inner.entries.get(local_id)?;
                if entry.state != SubscriptionState::Active {
                    return None;
                }
                if entry.kind != kind {
                    tracing::warn!(handle, local_id = %local_id, expected = %entry.kind, got = %kind, "notification kind mismatch");
                    return None;
                }
                Some((local_id.clone(), Arc::clone(&entry.callback)))
            })
        };

        match target {
            Some((local_id, callback)) => {
                callback(&local_id, payload);
                true
            }
            None => {
                tracing::debug!(handle, %kind, "dropping notification for unknown handle");
                false
            }
        }
    }

    /// Reset every live subscription for a fresh connection and re-send it.
    ///
    /// `Active` and `Pending` entries go back to `Pending` with handle and
    /// request id cleared, then `send` is called for each under a fresh
    /// request id. `Unsubscribing` entries are closed. Both indices are
    /// emptied first since nothing from the old connection can be
    /// correlated. The whole pass is one critical section, so no subscribe
    /// can interleave with it; `send` must only enqueue the frame.
    pub fn all_for_resubscription(
        &self,
        mut send: impl FnMut(&Resubscribe, RequestId) -> Result<(), SocketError>,
    ) -> Resubscription {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.by_request.clear();
        inner.by_handle.clear();

        let mut out = Resubscription::default();
        for (local_id, entry) in inner.entries.iter_mut() {
            entry.request_id = None;
            entry.handle = None;
            if entry.state == SubscriptionState::Unsubscribing {
                entry.state = SubscriptionState::Closed;
                out.closed.push(local_id.clone());
                continue;
            }
            entry.state = SubscriptionState::Pending;
            out.pending.push(Resubscribe {
                local_id: local_id.clone(),
                kind: entry.kind,
                params: entry.params.clone(),
                callback: Arc::clone(&entry.callback),
            });
        }
        inner
            .entries
            .retain(|_, entry| entry.state != SubscriptionState::Closed);

        let mut sent = Vec::with_capacity(out.pending.len());
        for sub in out.pending {
            let request_id = next_request_id();
            match send(&sub, request_id) {
                Ok(()) => {
                    inner.attach_subscribe(&sub.local_id, request_id);
                    sent.push(sub);
                }
                Err(e) => out.unsent.push((sub.local_id, e)),
            }
        }
        out.pending = sent;
        out
    }

    /// Force every subscription closed. Returns the ids that were live.
    pub fn close_all(&self) -> Vec<LocalId> {
        let mut inner = self.lock();
        inner.by_request.clear();
        inner.by_handle.clear();
        inner.entries.drain().map(|(id, _)| id).collect()
    }

    /// Current state; `None` once closed (or never issued).
    pub fn state(&self, local_id: &LocalId) -> Option<SubscriptionState> {
        self.lock().entries.get(local_id).map(|e| e.state)
    }

    /// Server handle of an `Active` or `Unsubscribing` subscription.
    pub fn handle(&self, local_id: &LocalId) -> Option<SocketHandle> {
        self.lock().entries.get(local_id).and_then(|e| e.handle)
    }

    /// Number of live (non-closed) subscriptions.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &inner.entries.len())
            .field("pending_requests", &inner.by_request.len())
            .field("active_handles", &inner.by_handle.len())
            .finish()
    }
}
