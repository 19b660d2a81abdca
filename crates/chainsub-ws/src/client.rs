//! Socket client: public subscribe/unsubscribe API, inbound dispatch,
//! reconnect and re-subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::task::JoinHandle;

use chainsub_core::error::SocketError;
use chainsub_core::method::{subscribe_params, unsubscribe_params, LogsFilter, SocketMethod, SubscriptionKind};
use chainsub_core::request::{self, DecodedFrame, JsonRpcError, RequestId};
use chainsub_core::subscription::{LocalId, SubscriptionState};
use chainsub_core::transport::{TransportAdapter, TransportEvent, TransportEvents, ABNORMAL_CLOSE_CODE};

use crate::config::SocketConfig;
use crate::delegate::{DelegateSlot, SocketDelegate};
use crate::registry::{NotificationCallback, RequestKind, SubscriptionRegistry};

/// Pub/sub client multiplexing many subscriptions over one transport.
///
/// Subscribe and unsubscribe calls return as soon as the request is handed
/// to the transport; acknowledgements and notifications arrive through the
/// [`SocketDelegate`]. Cloning is cheap and every clone drives the same
/// connection.
///
/// Subscribing requires a live connection: wait for the delegate's
/// `connected` callback after [`start`](Self::start). Call
/// [`stop`](Self::stop) when done; the dispatch task keeps the transport
/// alive until then.
#[derive(Clone)]
pub struct SocketClient {
    config: Arc<SocketConfig>,
    transport: Arc<dyn TransportAdapter>,
    registry: SubscriptionRegistry,
    delegate: DelegateSlot,
    connected: Arc<AtomicBool>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SocketClient {
    pub fn new(transport: Arc<dyn TransportAdapter>, config: SocketConfig) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            registry: SubscriptionRegistry::new(),
            delegate: DelegateSlot::default(),
            connected: Arc::new(AtomicBool::new(false)),
            dispatcher: Arc::new(Mutex::new(None)),
        }
    }

    /// Attach `delegate` (held weakly), open the transport and start
    /// dispatching its events.
    pub async fn start(&self, delegate: &Arc<dyn SocketDelegate>) -> Result<(), SocketError> {
        self.delegate.set(delegate);
        tracing::info!(url = %self.config.url, "opening pub/sub socket");
        let events = self
            .transport
            .open(&self.config.url, self.config.connect_timeout())
            .await?;

        let client = self.clone();
        let task = tokio::spawn(async move { client.run(events).await });
        let previous = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    /// Close the transport, close every subscription and release the delegate.
    pub fn stop(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.transport.close();
        let task = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        let closed = self.registry.close_all();
        self.delegate.clear();
        tracing::info!(url = %self.config.url, closed = closed.len(), "pub/sub socket stopped");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Lifecycle state of a subscription; `None` once closed.
    pub fn state(&self, id: &LocalId) -> Option<SubscriptionState> {
        self.registry.state(id)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // ─── Subscribe ───────────────────────────────────────────────────────────

    pub fn account_subscribe(&self, pubkey: &str) -> Result<LocalId, SocketError> {
        self.subscribe(SubscriptionKind::Account, Value::String(pubkey.to_string()))
    }

    pub fn program_subscribe(&self, pubkey: &str) -> Result<LocalId, SocketError> {
        self.subscribe(SubscriptionKind::Program, Value::String(pubkey.to_string()))
    }

    pub fn signature_subscribe(&self, signature: &str) -> Result<LocalId, SocketError> {
        self.subscribe(SubscriptionKind::Signature, Value::String(signature.to_string()))
    }

    pub fn logs_subscribe(&self, filter: LogsFilter) -> Result<LocalId, SocketError> {
        self.subscribe(SubscriptionKind::Logs, filter.to_param())
    }

    pub fn logs_subscribe_all(&self) -> Result<LocalId, SocketError> {
        self.logs_subscribe(LogsFilter::All)
    }

    fn subscribe(&self, kind: SubscriptionKind, target: Value) -> Result<LocalId, SocketError> {
        if !self.is_connected() {
            return Err(SocketError::Disconnected);
        }
        let params = subscribe_params(kind, target)?;
        let callback = self.notification_callback(kind);
        self.registry
            .register_pending(kind, params.clone(), callback, |request_id| {
                // Checked again under the registry lock: `on_connected` only
                // sets the flag once its re-subscription pass is done.
                if !self.is_connected() {
                    return Err(SocketError::Disconnected);
                }
                self.send_request(request_id, kind.subscribe_method(), params)
            })
    }

    fn send_request(&self, request_id: RequestId, method: SocketMethod, params: Vec<Value>) -> Result<(), SocketError> {
        let frame = request::encode_with_id(request_id, method, params)?;
        self.transport.send_text(frame)?;
        tracing::debug!(request_id, %method, "request sent");
        Ok(())
    }

    /// Handler that forwards notifications of `kind` to the matching delegate method.
    fn notification_callback(&self, kind: SubscriptionKind) -> NotificationCallback {
        let delegate = self.delegate.clone();
        Arc::new(move |id: &LocalId, payload: Value| {
            delegate.with(|d| match kind {
                SubscriptionKind::Account => d.account_notification(id, payload),
                SubscriptionKind::Program => d.program_notification(id, payload),
                SubscriptionKind::Signature => d.signature_notification(id, payload),
                SubscriptionKind::Logs => d.logs_notification(id, payload),
            })
        })
    }

    // ─── Unsubscribe ─────────────────────────────────────────────────────────

    pub fn account_unsubscribe(&self, id: &LocalId) -> Result<(), SocketError> {
        self.unsubscribe_kind(id, Some(SubscriptionKind::Account))
    }

    pub fn program_unsubscribe(&self, id: &LocalId) -> Result<(), SocketError> {
        self.unsubscribe_kind(id, Some(SubscriptionKind::Program))
    }

    pub fn signature_unsubscribe(&self, id: &LocalId) -> Result<(), SocketError> {
        self.unsubscribe_kind(id, Some(SubscriptionKind::Signature))
    }

    pub fn logs_unsubscribe(&self, id: &LocalId) -> Result<(), SocketError> {
        self.unsubscribe_kind(id, Some(SubscriptionKind::Logs))
    }

    /// Unsubscribe regardless of kind.
    pub fn unsubscribe(&self, id: &LocalId) -> Result<(), SocketError> {
        self.unsubscribe_kind(id, None)
    }

    fn unsubscribe_kind(&self, id: &LocalId, expected: Option<SubscriptionKind>) -> Result<(), SocketError> {
        if !self.is_connected() {
            return Err(SocketError::Disconnected);
        }
        let kind = self
            .registry
            .kind(id)
            .ok_or_else(|| SocketError::UnknownSubscription(id.clone()))?;
        if let Some(expected) = expected {
            if expected != kind {
                return Err(SocketError::KindMismatch {
                    id: id.clone(),
                    expected,
                    actual: kind,
                });
            }
        }

        let (handle, request_id) = self.registry.begin_unsubscribe(id)?;
        if let Err(e) = self.send_request(request_id, kind.unsubscribe_method(), unsubscribe_params(handle)) {
            self.registry.abort_unsubscribe(id);
            return Err(e);
        }
        tracing::debug!(local_id = %id, handle, "unsubscribe sent");
        Ok(())
    }

    // ─── Inbound ─────────────────────────────────────────────────────────────

    async fn run(self, mut events: TransportEvents) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        tracing::debug!(url = %self.config.url, "transport event stream ended");
    }

    /// Single dispatch point for transport events.
    ///
    /// Called by the task spawned in [`start`](Self::start); exposed for
    /// callers that drive a transport's event stream themselves.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { headers } => self.on_connected(headers.len()),
            TransportEvent::Disconnected { reason, code } => self.on_disconnected(&reason, code),
            TransportEvent::Text(text) => self.handle_frame(request::decode(&text)),
            TransportEvent::Binary(data) => self.handle_frame(request::decode_bytes(&data)),
            TransportEvent::Error(e) => {
                tracing::warn!(error = %e, "transport error");
                let err = SocketError::TransportFailure(e);
                self.delegate.with(|d| d.error(&err));
            }
            TransportEvent::ViabilityChanged(viable) => {
                tracing::info!(viable, "connection viability changed");
            }
            TransportEvent::ReconnectSuggested(suggested) => {
                tracing::info!(suggested, "transport suggests reconnecting");
            }
            TransportEvent::Cancelled => self.on_disconnected("cancelled", ABNORMAL_CLOSE_CODE),
        }
    }

    fn on_connected(&self, header_count: usize) {
        self.transport.resume();
        let reset = self.registry.all_for_resubscription(|sub, request_id| {
            self.send_request(request_id, sub.kind.subscribe_method(), sub.params.clone())
        });
        // Callers are admitted only after the pass, so none of their
        // subscribes can be reset and sent a second time.
        self.connected.store(true, Ordering::SeqCst);

        for id in &reset.closed {
            self.delegate.with(|d| d.unsubscribed(id));
        }
        for (id, e) in &reset.unsent {
            tracing::warn!(local_id = %id, error = %e, "re-subscribe failed, will retry on next connect");
        }
        tracing::info!(
            url = %self.config.url,
            resubscribed = reset.pending.len(),
            headers = header_count,
            "pub/sub socket connected"
        );
        self.delegate.with(|d| d.connected());
    }

    fn on_disconnected(&self, reason: &str, code: u16) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::warn!(url = %self.config.url, reason, code, "pub/sub socket disconnected");
        self.delegate.with(|d| d.disconnected(reason, code));
    }

    fn handle_frame(&self, frame: DecodedFrame) {
        match frame {
            DecodedFrame::Response { id, outcome } => match self.registry.request_kind(id) {
                Some(RequestKind::Subscribe) => self.resolve_subscribe(id, outcome),
                Some(RequestKind::Unsubscribe) => self.resolve_unsubscribe(id, outcome),
                None => {
                    tracing::debug!(error = %SocketError::UnmatchedRequestId(id), "dropping stale ack");
                }
            },
            DecodedFrame::Notification { kind, handle, payload } => {
                self.registry.dispatch_notification(kind, handle, payload);
            }
            DecodedFrame::Malformed(reason) => {
                tracing::warn!(%reason, "dropping malformed frame");
                let err = SocketError::Malformed(reason);
                self.delegate.with(|d| d.error(&err));
            }
        }
    }

    fn resolve_subscribe(&self, request_id: RequestId, outcome: Result<Value, JsonRpcError>) {
        let reason = match outcome {
            Ok(result) => match result.as_u64() {
                Some(handle) => {
                    match self.registry.resolve_subscribe_ack(request_id, handle) {
                        Ok(ack) if ack.resubscribed => {
                            tracing::debug!(local_id = %ack.local_id, handle, "re-subscribed");
                        }
                        Ok(ack) => {
                            tracing::debug!(local_id = %ack.local_id, handle, "subscribed");
                            self.delegate.with(|d| d.subscribed(handle, &ack.local_id));
                        }
                        Err(e) => tracing::debug!(error = %e, "dropping stale ack"),
                    }
                    return;
                }
                None => SocketError::Malformed(format!("subscribe result {result} is not a subscription id")),
            },
            Err(err) => SocketError::ServerRejected(err),
        };

        match self.registry.resolve_subscribe_failure(request_id, reason) {
            Ok((local_id, reason)) => {
                tracing::warn!(local_id = %local_id, request_id, error = %reason, "subscribe failed");
                self.delegate.with(|d| d.error(&reason));
            }
            Err(e) => tracing::debug!(error = %e, "dropping stale ack"),
        }
    }

    fn resolve_unsubscribe(&self, request_id: RequestId, outcome: Result<Value, JsonRpcError>) {
        match outcome {
            Ok(result) => match self.registry.resolve_unsubscribe_ack(request_id) {
                Ok(local_id) => {
                    if result != Value::Bool(true) {
                        tracing::warn!(local_id = %local_id, %result, "server did not confirm unsubscribe");
                    }
                    self.delegate.with(|d| d.unsubscribed(&local_id));
                }
                Err(e) => tracing::debug!(error = %e, "dropping stale ack"),
            },
            Err(err) => match self.registry.resolve_unsubscribe_failure(request_id) {
                Ok(local_id) => {
                    let err = SocketError::ServerRejected(err);
                    tracing::warn!(local_id = %local_id, request_id, error = %err, "unsubscribe failed");
                    self.delegate.with(|d| d.error(&err));
                }
                Err(e) => tracing::debug!(error = %e, "dropping stale ack"),
            },
        }
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("url", &self.config.url)
            .field("connected", &self.is_connected())
            .field("registry", &self.registry)
            .finish()
    }
}
