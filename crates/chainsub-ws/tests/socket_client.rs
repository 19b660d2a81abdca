//! Socket client behaviour against a scripted transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use chainsub_core::error::{SocketError, TransportError};
use chainsub_core::method::LogsFilter;
use chainsub_core::subscription::{LocalId, SocketHandle, SubscriptionState};
use chainsub_core::transport::{TransportAdapter, TransportEvent, TransportEvents};
use chainsub_ws::{SocketClient, SocketConfig, SocketDelegate};

// ─── Fixtures ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockTransport {
    sent: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
    /// Refuse sends until `resume`, like a transport that just reconnected.
    gated: AtomicBool,
    closed: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockTransport {
    fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    fn last_sent(&self) -> Value {
        self.sent().pop().expect("nothing sent")
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    async fn open(&self, _url: &str, _timeout: Duration) -> Result<TransportEvents, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn send_text(&self, frame: String) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::WebSocket("broken pipe".into()));
        }
        if self.gated.load(Ordering::SeqCst) {
            return Err(TransportError::Reconnecting);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn resume(&self) {
        self.gated.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Connected,
    Subscribed(SocketHandle, LocalId),
    Unsubscribed(LocalId),
    Account(LocalId, Value),
    Program(LocalId, Value),
    Signature(LocalId, Value),
    Logs(LocalId, Value),
    Disconnected(String, u16),
    Error(String),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn push(&self, e: Event) {
        self.events.lock().unwrap().push(e);
    }
}

impl SocketDelegate for Recorder {
    fn connected(&self) {
        self.push(Event::Connected);
    }
    fn subscribed(&self, handle: SocketHandle, id: &LocalId) {
        self.push(Event::Subscribed(handle, id.clone()));
    }
    fn unsubscribed(&self, id: &LocalId) {
        self.push(Event::Unsubscribed(id.clone()));
    }
    fn account_notification(&self, id: &LocalId, payload: Value) {
        self.push(Event::Account(id.clone(), payload));
    }
    fn program_notification(&self, id: &LocalId, payload: Value) {
        self.push(Event::Program(id.clone(), payload));
    }
    fn signature_notification(&self, id: &LocalId, payload: Value) {
        self.push(Event::Signature(id.clone(), payload));
    }
    fn logs_notification(&self, id: &LocalId, payload: Value) {
        self.push(Event::Logs(id.clone(), payload));
    }
    fn disconnected(&self, reason: &str, code: u16) {
        self.push(Event::Disconnected(reason.to_string(), code));
    }
    fn error(&self, error: &SocketError) {
        self.push(Event::Error(error.to_string()));
    }
}

struct Harness {
    client: SocketClient,
    transport: Arc<MockTransport>,
    recorder: Arc<Recorder>,
}

async fn harness() -> Harness {
    let transport = Arc::new(MockTransport::default());
    let client = SocketClient::new(transport.clone(), SocketConfig::new("ws://mock"));
    let recorder = Arc::new(Recorder::default());
    let delegate: Arc<dyn SocketDelegate> = recorder.clone();
    client.start(&delegate).await.unwrap();
    Harness { client, transport, recorder }
}

async fn connected_harness() -> Harness {
    let h = harness().await;
    h.client.handle_event(connected());
    assert_eq!(h.recorder.take(), vec![Event::Connected]);
    h
}

fn connected() -> TransportEvent {
    TransportEvent::Connected { headers: HashMap::new() }
}

fn frame(v: Value) -> TransportEvent {
    TransportEvent::Text(v.to_string())
}

fn ack(id: &Value, result: Value) -> TransportEvent {
    frame(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

fn notification(method: &str, handle: SocketHandle, result: Value) -> TransportEvent {
    frame(json!({"jsonrpc": "2.0", "method": method, "params": {"subscription": handle, "result": result}}))
}

/// Subscribe to an account and acknowledge it under `handle`.
fn active_account(h: &Harness, pubkey: &str, handle: SocketHandle) -> LocalId {
    let id = h.client.account_subscribe(pubkey).unwrap();
    let req = h.transport.last_sent();
    h.client.handle_event(ack(&req["id"], json!(handle)));
    assert_eq!(h.recorder.take(), vec![Event::Subscribed(handle, id.clone())]);
    id
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn account_subscribe_ack_and_notification() {
    let h = connected_harness().await;

    let id = h.client.account_subscribe("ABC").unwrap();
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Pending));

    let req = h.transport.last_sent();
    assert_eq!(req["jsonrpc"], "2.0");
    assert_eq!(req["method"], "accountSubscribe");
    assert_eq!(req["params"], json!(["ABC", {"commitment": "recent", "encoding": "base64"}]));
    assert!(req["id"].is_u64());

    h.client.handle_event(ack(&req["id"], json!(901234)));
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Active));
    assert_eq!(h.recorder.take(), vec![Event::Subscribed(901234, id.clone())]);

    h.client
        .handle_event(notification("accountNotification", 901234, json!({"lamports": 42})));
    assert_eq!(h.recorder.take(), vec![Event::Account(id, json!({"lamports": 42}))]);
}

#[tokio::test]
async fn unsubscribe_closes_and_drops_late_notifications() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 901234);

    h.client.account_unsubscribe(&id).unwrap();
    let req = h.transport.last_sent();
    assert_eq!(req["method"], "accountUnsubscribe");
    assert_eq!(req["params"], json!([901234]));
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Unsubscribing));

    h.client.handle_event(ack(&req["id"], json!(true)));
    assert_eq!(h.client.state(&id), None);
    assert_eq!(h.recorder.take(), vec![Event::Unsubscribed(id.clone())]);

    h.client
        .handle_event(notification("accountNotification", 901234, json!({"late": true})));
    assert!(h.recorder.take().is_empty());

    // closed ids are never valid again
    assert!(matches!(
        h.client.account_unsubscribe(&id),
        Err(SocketError::UnknownSubscription(_))
    ));
}

#[tokio::test]
async fn every_kind_builds_its_params() {
    let h = connected_harness().await;
    let confirmed = json!({"commitment": "confirmed", "encoding": "base64"});

    h.client.program_subscribe("Prog111").unwrap();
    let req = h.transport.last_sent();
    assert_eq!(req["method"], "programSubscribe");
    assert_eq!(req["params"], json!(["Prog111", confirmed]));

    h.client.signature_subscribe("5igA").unwrap();
    let req = h.transport.last_sent();
    assert_eq!(req["method"], "signatureSubscribe");
    assert_eq!(req["params"], json!(["5igA", confirmed]));

    h.client
        .logs_subscribe(LogsFilter::Mentions(vec!["Addr1".into(), "Addr2".into()]))
        .unwrap();
    let req = h.transport.last_sent();
    assert_eq!(req["method"], "logsSubscribe");
    assert_eq!(req["params"], json!([{"mentions": ["Addr1", "Addr2"]}, confirmed]));

    h.client.logs_subscribe_all().unwrap();
    let req = h.transport.last_sent();
    assert_eq!(req["params"], json!(["all", confirmed]));

    let ids: Vec<u64> = h
        .transport
        .sent()
        .iter()
        .map(|r| r["id"].as_u64().unwrap())
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "request ids must increase: {ids:?}");
}

#[tokio::test]
async fn notifications_route_to_matching_delegate_method() {
    let h = connected_harness().await;

    let program = h.client.program_subscribe("P").unwrap();
    h.client.handle_event(ack(&h.transport.last_sent()["id"], json!(1)));
    let signature = h.client.signature_subscribe("S").unwrap();
    h.client.handle_event(ack(&h.transport.last_sent()["id"], json!(2)));
    let logs = h.client.logs_subscribe_all().unwrap();
    h.client.handle_event(ack(&h.transport.last_sent()["id"], json!(3)));
    h.recorder.take();

    h.client.handle_event(notification("logsNotification", 3, json!("l")));
    h.client.handle_event(notification("programNotification", 1, json!("p")));
    h.client.handle_event(notification("signatureNotification", 2, json!("s")));
    // kind does not match the subscription behind handle 1
    h.client.handle_event(notification("accountNotification", 1, json!("x")));

    assert_eq!(
        h.recorder.take(),
        vec![
            Event::Logs(logs, json!("l")),
            Event::Program(program, json!("p")),
            Event::Signature(signature, json!("s")),
        ]
    );
}

#[tokio::test]
async fn subscribe_requires_connection() {
    let h = harness().await;
    assert!(matches!(
        h.client.account_subscribe("ABC"),
        Err(SocketError::Disconnected)
    ));
    assert!(h.transport.sent().is_empty());
    assert!(h.client.registry().is_empty());
}

#[tokio::test]
async fn unsubscribe_pending_is_rejected_without_send() {
    let h = connected_harness().await;
    let id = h.client.account_subscribe("ABC").unwrap();
    let before = h.transport.sent().len();

    assert!(matches!(
        h.client.account_unsubscribe(&id),
        Err(SocketError::NotActive { state: SubscriptionState::Pending, .. })
    ));
    assert!(matches!(
        h.client.unsubscribe(&LocalId::from("L-never-issued")),
        Err(SocketError::UnknownSubscription(_))
    ));
    assert_eq!(h.transport.sent().len(), before);
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Pending));
}

#[tokio::test]
async fn second_unsubscribe_is_rejected() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 7);
    h.client.unsubscribe(&id).unwrap();
    let before = h.transport.sent().len();
    assert!(matches!(
        h.client.unsubscribe(&id),
        Err(SocketError::NotActive { state: SubscriptionState::Unsubscribing, .. })
    ));
    assert_eq!(h.transport.sent().len(), before);
}

#[tokio::test]
async fn kind_specific_unsubscribe_checks_kind() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 5);
    let before = h.transport.sent().len();
    assert!(matches!(
        h.client.logs_unsubscribe(&id),
        Err(SocketError::KindMismatch { .. })
    ));
    assert_eq!(h.transport.sent().len(), before);
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Active));
}

#[tokio::test]
async fn server_rejected_subscribe_closes_subscription() {
    let h = connected_harness().await;
    let id = h.client.signature_subscribe("bad-sig").unwrap();
    let req = h.transport.last_sent();

    h.client.handle_event(frame(json!({
        "jsonrpc": "2.0",
        "id": req["id"],
        "error": {"code": -32602, "message": "Invalid Request: Invalid signature"}
    })));

    assert_eq!(h.client.state(&id), None);
    let events = h.recorder.take();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::Error(msg) if msg.contains("-32602")));
}

#[tokio::test]
async fn non_numeric_subscribe_result_is_a_failure() {
    let h = connected_harness().await;
    let id = h.client.account_subscribe("ABC").unwrap();
    h.client.handle_event(ack(&h.transport.last_sent()["id"], json!("0xabc")));
    assert_eq!(h.client.state(&id), None);
    assert!(matches!(&h.recorder.take()[..], [Event::Error(_)]));
}

#[tokio::test]
async fn server_rejected_unsubscribe_closes_and_reports() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 9);
    h.client.unsubscribe(&id).unwrap();
    let req = h.transport.last_sent();
    h.client.handle_event(frame(json!({
        "jsonrpc": "2.0",
        "id": req["id"],
        "error": {"code": -32602, "message": "Invalid subscription id."}
    })));
    assert_eq!(h.client.state(&id), None);
    assert!(matches!(&h.recorder.take()[..], [Event::Error(_)]));
}

#[tokio::test]
async fn malformed_frames_do_not_stop_dispatch() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 11);

    h.client.handle_event(TransportEvent::Text("{not json".into()));
    h.client.handle_event(frame(json!({"jsonrpc": "2.0", "method": "accountNotification", "params": {}})));
    h.client.handle_event(notification("accountNotification", 11, json!(1)));

    let events = h.recorder.take();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], Event::Error(_)));
    assert!(matches!(&events[1], Event::Error(_)));
    assert_eq!(events[2], Event::Account(id, json!(1)));
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn binary_frames_are_decoded() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 12);
    let payload = json!({"jsonrpc": "2.0", "method": "accountNotification", "params": {"subscription": 12, "result": "b"}});
    h.client
        .handle_event(TransportEvent::Binary(payload.to_string().into_bytes()));
    assert_eq!(h.recorder.take(), vec![Event::Account(id, json!("b"))]);
}

#[tokio::test]
async fn stale_acks_and_unknown_handles_are_silent() {
    let h = connected_harness().await;
    h.client.handle_event(ack(&json!(987_654_321u64), json!(1)));
    h.client.handle_event(notification("logsNotification", 404, json!({})));
    assert!(h.recorder.take().is_empty());
}

#[tokio::test]
async fn send_failure_leaves_no_subscription() {
    let h = connected_harness().await;
    h.transport.fail_sends.store(true, Ordering::SeqCst);
    assert!(matches!(
        h.client.account_subscribe("ABC"),
        Err(SocketError::TransportFailure(_))
    ));
    assert!(h.client.registry().is_empty());
}

#[tokio::test]
async fn failed_unsubscribe_send_keeps_subscription_active() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 13);
    h.transport.fail_sends.store(true, Ordering::SeqCst);
    assert!(matches!(
        h.client.unsubscribe(&id),
        Err(SocketError::TransportFailure(_))
    ));
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Active));

    h.client.handle_event(notification("accountNotification", 13, json!(2)));
    assert_eq!(h.recorder.take(), vec![Event::Account(id, json!(2))]);
}

#[tokio::test]
async fn reconnect_resubscribes_under_same_local_id() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 100);
    let pending = h.client.logs_subscribe_all().unwrap();
    let first_request = h.transport.last_sent()["id"].clone();

    h.client.handle_event(TransportEvent::Disconnected {
        reason: "server restart".into(),
        code: 1012,
    });
    assert!(!h.client.is_connected());
    assert_eq!(
        h.recorder.take(),
        vec![Event::Disconnected("server restart".into(), 1012)]
    );
    // registry survives the disconnect
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Active));
    assert!(matches!(h.client.account_subscribe("DEF"), Err(SocketError::Disconnected)));

    let sent_before = h.transport.sent().len();
    h.client.handle_event(connected());
    assert_eq!(h.recorder.take(), vec![Event::Connected]);
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Pending));
    assert_eq!(h.client.state(&pending), Some(SubscriptionState::Pending));

    let resent: Vec<Value> = h.transport.sent()[sent_before..].to_vec();
    assert_eq!(resent.len(), 2);
    let account_req = resent
        .iter()
        .find(|r| r["method"] == "accountSubscribe")
        .unwrap()
        .clone();
    let logs_req = resent
        .iter()
        .find(|r| r["method"] == "logsSubscribe")
        .unwrap()
        .clone();
    assert_ne!(logs_req["id"], first_request);

    // an ack for the pre-disconnect request no longer matches anything
    h.client.handle_event(ack(&first_request, json!(555)));
    assert_eq!(h.client.state(&pending), Some(SubscriptionState::Pending));

    h.client.handle_event(ack(&account_req["id"], json!(200)));
    h.client.handle_event(ack(&logs_req["id"], json!(201)));
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Active));

    // first ack of the logs subscription is reported, the re-ack is silent
    assert_eq!(h.recorder.take(), vec![Event::Subscribed(201, pending.clone())]);

    h.client.handle_event(notification("accountNotification", 100, json!("old")));
    h.client.handle_event(notification("accountNotification", 200, json!("new")));
    assert_eq!(h.recorder.take(), vec![Event::Account(id, json!("new"))]);
}

#[tokio::test]
async fn subscribe_before_disconnect_is_seen_is_refused_by_transport() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 500);

    // the transport already dropped and reconnected; the client has not
    // processed the disconnect yet
    h.transport.gated.store(true, Ordering::SeqCst);
    let sent_before = h.transport.sent().len();
    assert!(matches!(
        h.client.program_subscribe("P"),
        Err(SocketError::TransportFailure(TransportError::Reconnecting))
    ));
    assert_eq!(h.client.registry().len(), 1);

    h.client.handle_event(TransportEvent::Disconnected { reason: "reset".into(), code: 1006 });
    h.client.handle_event(connected());
    let resent = &h.transport.sent()[sent_before..];
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0]["method"], "accountSubscribe");
    assert_eq!(h.client.state(&id), Some(SubscriptionState::Pending));
}

#[tokio::test]
async fn subscribes_racing_reconnect_keep_one_live_request_each() {
    let h = connected_harness().await;
    for handle in 600..605 {
        active_account(&h, "ABC", handle);
    }

    for _ in 0..20 {
        h.client.handle_event(TransportEvent::Disconnected { reason: "reset".into(), code: 1006 });
        let client = h.client.clone();
        let caller = std::thread::spawn(move || {
            (0..20).map(|_| client.account_subscribe("DEF")).collect::<Vec<_>>()
        });
        h.client.handle_event(connected());
        for result in caller.join().unwrap() {
            match result {
                Ok(id) => assert_eq!(h.client.state(&id), Some(SubscriptionState::Pending)),
                Err(e) => assert!(matches!(e, SocketError::Disconnected), "unexpected {e}"),
            }
        }
    }

    let registry = h.client.registry();
    let outstanding = h
        .transport
        .sent()
        .iter()
        .filter(|r| r["method"] == "accountSubscribe")
        .filter(|r| registry.request_kind(r["id"].as_u64().unwrap()).is_some())
        .count();
    assert_eq!(outstanding, registry.len());
}

#[tokio::test]
async fn reconnect_closes_inflight_unsubscribes() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 300);
    h.client.unsubscribe(&id).unwrap();

    h.client.handle_event(TransportEvent::Disconnected { reason: "reset".into(), code: 1006 });
    h.recorder.take();
    let sent_before = h.transport.sent().len();
    h.client.handle_event(connected());

    assert_eq!(h.client.state(&id), None);
    assert_eq!(h.recorder.take(), vec![Event::Unsubscribed(id), Event::Connected]);
    assert_eq!(h.transport.sent().len(), sent_before);
}

#[tokio::test]
async fn cancelled_transport_reports_disconnect() {
    let h = connected_harness().await;
    h.client.handle_event(TransportEvent::Cancelled);
    assert!(!h.client.is_connected());
    assert_eq!(h.recorder.take(), vec![Event::Disconnected("cancelled".into(), 1006)]);
}

#[tokio::test]
async fn transport_errors_reach_delegate() {
    let h = connected_harness().await;
    h.client
        .handle_event(TransportEvent::Error(TransportError::WebSocket("reset by peer".into())));
    h.client.handle_event(TransportEvent::ViabilityChanged(false));
    h.client.handle_event(TransportEvent::ReconnectSuggested(true));
    let events = h.recorder.take();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::Error(msg) if msg.contains("reset by peer")));
}

#[tokio::test]
async fn stop_closes_everything_and_releases_delegate() {
    let h = connected_harness().await;
    let id = active_account(&h, "ABC", 400);
    let pending = h.client.program_subscribe("P").unwrap();

    h.client.stop();
    assert!(h.transport.closed.load(Ordering::SeqCst));
    assert!(!h.client.is_connected());
    assert_eq!(h.client.state(&id), None);
    assert_eq!(h.client.state(&pending), None);
    assert!(h.client.registry().is_empty());

    h.client.handle_event(notification("accountNotification", 400, json!(0)));
    h.client.handle_event(connected());
    assert!(h.recorder.take().is_empty());

    // only the test holds the delegate now
    assert_eq!(Arc::strong_count(&h.recorder), 1);
}

#[tokio::test]
async fn dropped_delegate_is_tolerated() {
    let transport = Arc::new(MockTransport::default());
    let client = SocketClient::new(transport.clone(), SocketConfig::new("ws://mock"));
    {
        let delegate: Arc<dyn SocketDelegate> = Arc::new(Recorder::default());
        client.start(&delegate).await.unwrap();
    }
    client.handle_event(connected());
    let id = client.account_subscribe("ABC").unwrap();
    client.handle_event(ack(&transport.last_sent()["id"], json!(1)));
    client.handle_event(notification("accountNotification", 1, json!(0)));
    assert_eq!(client.state(&id), Some(SubscriptionState::Active));
}

#[tokio::test]
async fn local_ids_are_unique_across_clients_and_closures() {
    let a = connected_harness().await;
    let b = connected_harness().await;
    let mut seen = std::collections::HashSet::new();
    for _ in 0..50 {
        let id = a.client.account_subscribe("A").unwrap();
        a.client.handle_event(ack(&a.transport.last_sent()["id"], json!(1)));
        a.client.unsubscribe(&id).unwrap();
        a.client.handle_event(ack(&a.transport.last_sent()["id"], json!(true)));
        assert!(seen.insert(id));
        assert!(seen.insert(b.client.logs_subscribe_all().unwrap()));
    }
}
