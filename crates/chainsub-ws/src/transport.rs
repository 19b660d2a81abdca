//! tokio-tungstenite implementation of [`TransportAdapter`].
//!
//! A background task owns the socket, turns frames into [`TransportEvent`]s,
//! answers pings and reconnects with exponential backoff when the
//! connection drops. Sends are refused from the moment a connection drops
//! until the client calls [`TransportAdapter::resume`] for the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainsub_core::error::TransportError;
use chainsub_core::policy::{RetryConfig, RetryPolicy};
use chainsub_core::transport::{TransportAdapter, TransportEvent, TransportEvents, ABNORMAL_CLOSE_CODE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code used when the peer sent a close frame without a status.
const NO_STATUS_CODE: u16 = 1005;

/// Command sent from callers to the background WS task.
#[derive(Debug)]
enum WsCommand {
    Text(String),
    Close,
}

/// How a connection ended.
enum Exit {
    /// `close()` was called or nobody listens for events any more.
    Closed,
    /// The connection dropped; reconnect.
    Dropped { reason: String, code: u16 },
}

/// WebSocket transport with auto-reconnect.
pub struct WsTransport {
    retry: RetryPolicy,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
    /// Cleared by the background task when a connection drops.
    accepting: Arc<AtomicBool>,
}

impl WsTransport {
    pub fn new(reconnect: RetryConfig) -> Self {
        Self {
            retry: RetryPolicy::new(reconnect),
            cmd_tx: Mutex::new(None),
            accepting: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[async_trait]
impl TransportAdapter for WsTransport {
    async fn open(&self, url: &str, timeout: Duration) -> Result<TransportEvents, TransportError> {
        let (stream, headers) = connect(url, timeout).await?;
        tracing::info!(url = %url, "WebSocket connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(TransportEvent::Connected { headers });

        let previous = self
            .cmd_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cmd_tx);
        if let Some(previous) = previous {
            let _ = previous.send(WsCommand::Close);
        }
        self.accepting.store(true, Ordering::SeqCst);

        let url = url.to_string();
        let retry = self.retry.clone();
        let accepting = Arc::clone(&self.accepting);
        tokio::spawn(async move {
            ws_task(url, timeout, stream, cmd_rx, event_tx, retry, accepting).await;
        });

        Ok(event_rx)
    }

    fn send_text(&self, frame: String) -> Result<(), TransportError> {
        let guard = self.cmd_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(TransportError::Reconnecting);
        }
        tx.send(WsCommand::Text(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn resume(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        let tx = self
            .cmd_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(WsCommand::Close);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<(WsStream, HashMap<String, String>), TransportError> {
    let (stream, response) = time::timeout(timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout {
            ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| match e {
            tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_) => {
                TransportError::Other(format!("invalid url {url}: {e}"))
            }
            e => TransportError::WebSocket(e.to_string()),
        })?;

    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    Ok((stream, headers))
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    timeout: Duration,
    mut stream: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    retry: RetryPolicy,
    accepting: Arc<AtomicBool>,
) {
    loop {
        let (reason, code) = match pump(stream, &mut cmd_rx, &events).await {
            Exit::Closed => {
                tracing::info!(url = %url, "WebSocket closed");
                return;
            }
            Exit::Dropped { reason, code } => (reason, code),
        };

        accepting.store(false, Ordering::SeqCst);
        tracing::warn!(url = %url, %reason, code, "WS disconnected");
        if events.send(TransportEvent::Disconnected { reason, code }).is_err() {
            return;
        }

        let mut attempt = 0u32;
        stream = loop {
            attempt += 1;
            let Some(delay) = retry.next_delay(attempt) else {
                tracing::error!(url = %url, attempts = attempt - 1, "giving up reconnecting");
                let _ = events.send(TransportEvent::Cancelled);
                return;
            };
            tracing::info!(url = %url, attempt, "reconnecting in {delay:?}");
            if !wait_discarding(delay, &mut cmd_rx).await {
                return;
            }

            match connect(&url, timeout).await {
                Ok((stream, headers)) => {
                    accepting.store(false, Ordering::SeqCst);
                    // Frames queued while disconnected carry request ids the
                    // new connection knows nothing about.
                    if !discard_queued(&mut cmd_rx) {
                        return;
                    }
                    tracing::info!(url = %url, attempt, "WebSocket reconnected");
                    if events.send(TransportEvent::Connected { headers }).is_err() {
                        return;
                    }
                    break stream;
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(url = %url, error = %e, "giving up reconnecting");
                    let _ = events.send(TransportEvent::Error(e));
                    let _ = events.send(TransportEvent::Cancelled);
                    return;
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "WS connect failed");
                    if events.send(TransportEvent::Error(e)).is_err() {
                        return;
                    }
                }
            }
        };
    }
}

/// Shuttle frames until the connection ends.
async fn pump(
    stream: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Exit {
    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.close().await;
                        return Exit::Closed;
                    }
                    Some(WsCommand::Text(frame)) => {
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            let reason = e.to_string();
                            let _ = events.send(TransportEvent::Error(TransportError::WebSocket(reason.clone())));
                            return Exit::Dropped { reason, code: ABNORMAL_CLOSE_CODE };
                        }
                    }
                }
            }
            msg = stream.next() => {
                let event = match msg {
                    None => {
                        return Exit::Dropped {
                            reason: "stream ended".into(),
                            code: ABNORMAL_CLOSE_CODE,
                        };
                    }
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        let _ = events.send(TransportEvent::Error(TransportError::WebSocket(reason.clone())));
                        return Exit::Dropped { reason, code: ABNORMAL_CLOSE_CODE };
                    }
                    Some(Ok(Message::Text(text))) => TransportEvent::Text(text.to_string()),
                    Some(Ok(Message::Binary(data))) => TransportEvent::Binary(data.to_vec()),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((NO_STATUS_CODE, String::new()));
                        return Exit::Dropped { reason, code };
                    }
                    Some(Ok(_)) => continue,
                };
                if events.send(event).is_err() {
                    let _ = sink.close().await;
                    return Exit::Closed;
                }
            }
        }
    }
}

/// Sleep for `delay`, dropping frames sent meanwhile. Returns `false` on close.
async fn wait_discarding(delay: Duration, cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => return false,
                Some(WsCommand::Text(_)) => {
                    tracing::debug!("dropping frame sent while disconnected");
                }
            }
        }
    }
}

/// Drain frames queued before the connection came back. Returns `false` on close.
fn discard_queued(cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>) -> bool {
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            WsCommand::Close => return false,
            WsCommand::Text(_) => tracing::debug!("dropping frame sent while disconnected"),
        }
    }
    true
}
