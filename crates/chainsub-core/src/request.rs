//! JSON-RPC 2.0 wire types and the pub/sub frame codec.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SocketError;
use crate::method::{SocketMethod, SubscriptionKind};
use crate::subscription::SocketHandle;

/// Outbound JSON-RPC request id.
pub type RequestId = u64;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next outbound request id.
///
/// Process-wide and monotonically increasing; ids are never reused.
pub fn next_request_id() -> RequestId {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: RpcId::Number(id),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// An inbound frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// Reply to exactly one outstanding request.
    Response {
        id: RequestId,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Server push for an active subscription.
    Notification {
        kind: SubscriptionKind,
        handle: SocketHandle,
        payload: Value,
    },
    /// Not valid JSON, or required fields missing. Dropped by the caller.
    Malformed(String),
}

/// Encode `method(params)` with a freshly allocated request id.
pub fn encode(method: SocketMethod, params: Vec<Value>) -> Result<(RequestId, String), SocketError> {
    let id = next_request_id();
    let frame = encode_with_id(id, method, params)?;
    Ok((id, frame))
}

/// Encode `method(params)` under an id the caller already allocated.
pub fn encode_with_id(id: RequestId, method: SocketMethod, params: Vec<Value>) -> Result<String, SocketError> {
    let req = JsonRpcRequest::new(id, method.as_str(), params);
    Ok(serde_json::to_string(&req)?)
}

/// Classify a binary frame. Frames must be UTF-8 JSON.
pub fn decode_bytes(frame: &[u8]) -> DecodedFrame {
    match std::str::from_utf8(frame) {
        Ok(text) => decode(text),
        Err(e) => DecodedFrame::Malformed(format!("binary frame is not UTF-8: {e}")),
    }
}

/// Classify a text frame as a response, a notification, or malformed.
///
/// Never fails: anything that cannot be correlated is `Malformed`.
pub fn decode(frame: &str) -> DecodedFrame {
    let value: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => return DecodedFrame::Malformed(format!("invalid JSON: {e}")),
    };
    let Some(obj) = value.as_object() else {
        return DecodedFrame::Malformed("frame is not a JSON object".into());
    };

    if let Some(method) = obj.get("method") {
        return decode_notification(method, obj.get("params"));
    }

    let id = match obj.get("id").and_then(Value::as_u64) {
        Some(id) => id,
        None => return DecodedFrame::Malformed("response without a numeric id".into()),
    };

    if let Some(error) = obj.get("error") {
        return match serde_json::from_value::<JsonRpcError>(error.clone()) {
            Ok(err) => DecodedFrame::Response { id, outcome: Err(err) },
            Err(e) => DecodedFrame::Malformed(format!("response {id} has an invalid error object: {e}")),
        };
    }

    match obj.get("result") {
        Some(result) => DecodedFrame::Response {
            id,
            outcome: Ok(result.clone()),
        },
        None => DecodedFrame::Malformed(format!("response {id} has neither result nor error")),
    }
}

fn decode_notification(method: &Value, params: Option<&Value>) -> DecodedFrame {
    let Some(method) = method.as_str() else {
        return DecodedFrame::Malformed("notification method is not a string".into());
    };
    let Some(kind) = SubscriptionKind::from_notification_method(method) else {
        return DecodedFrame::Malformed(format!("unsupported notification {method}"));
    };
    let Some(handle) = params
        .and_then(|p| p.get("subscription"))
        .and_then(Value::as_u64)
    else {
        return DecodedFrame::Malformed(format!("{method} without params.subscription"));
    };
    let payload = params
        .and_then(|p| p.get("result"))
        .cloned()
        .unwrap_or(Value::Null);

    DecodedFrame::Notification { kind, handle, payload }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let frame = encode_with_id(
            2,
            SocketMethod::AccountUnsubscribe,
            vec![json!(901234)],
        )
        .unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            v,
            json!({"jsonrpc": "2.0", "id": 2, "method": "accountUnsubscribe", "params": [901234]})
        );
    }

    #[test]
    fn request_ids_increase() {
        let (a, _) = encode(SocketMethod::LogsSubscribe, vec![json!("all")]).unwrap();
        let (b, _) = encode(SocketMethod::LogsSubscribe, vec![json!("all")]).unwrap();
        assert!(b > a);
    }

    #[test]
    fn decode_success_response() {
        let frame = decode(r#"{"jsonrpc":"2.0","result":901234,"id":1}"#);
        assert_eq!(
            frame,
            DecodedFrame::Response { id: 1, outcome: Ok(json!(901234)) }
        );
    }

    #[test]
    fn decode_error_response() {
        let frame = decode(
            r#"{"error":{"message":"Invalid subscription id.","code":-32602},"id":9,"jsonrpc":"2.0"}"#,
        );
        match frame {
            DecodedFrame::Response { id, outcome: Err(err) } => {
                assert_eq!(id, 9);
                assert_eq!(err.code, -32602);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decode_notification_any_field_order() {
        let frame = decode(
            r#"{"params":{"result":{"lamports":5},"subscription":901234},"method":"accountNotification","jsonrpc":"2.0"}"#,
        );
        assert_eq!(
            frame,
            DecodedFrame::Notification {
                kind: SubscriptionKind::Account,
                handle: 901234,
                payload: json!({"lamports": 5}),
            }
        );
    }

    #[test]
    fn notification_without_subscription_is_malformed() {
        let frame = decode(r#"{"jsonrpc":"2.0","method":"logsNotification","params":{"result":{}}}"#);
        assert!(matches!(frame, DecodedFrame::Malformed(_)));
    }

    #[test]
    fn unsupported_notification_is_malformed() {
        let frame = decode(r#"{"jsonrpc":"2.0","method":"slotNotification","params":{"subscription":1,"result":{}}}"#);
        assert!(matches!(frame, DecodedFrame::Malformed(m) if m.contains("slotNotification")));
    }

    #[test]
    fn response_without_id_is_malformed() {
        assert!(matches!(decode(r#"{"jsonrpc":"2.0","result":5}"#), DecodedFrame::Malformed(_)));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#),
            DecodedFrame::Malformed(_)
        ));
        assert!(matches!(decode(r#"{"jsonrpc":"2.0","id":3}"#), DecodedFrame::Malformed(_)));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(decode("not json"), DecodedFrame::Malformed(_)));
        assert!(matches!(decode("[1,2,3]"), DecodedFrame::Malformed(_)));
        assert!(matches!(decode_bytes(&[0xff, 0xfe]), DecodedFrame::Malformed(_)));
    }

    #[test]
    fn binary_frames_decode_like_text() {
        let frame = decode_bytes(br#"{"jsonrpc":"2.0","id":4,"result":true}"#);
        assert_eq!(frame, DecodedFrame::Response { id: 4, outcome: Ok(json!(true)) });
    }
}
