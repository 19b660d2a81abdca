//! Pub/sub method names and the static per-method request configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::subscription::SocketHandle;

/// JSON-RPC method names understood by the pub/sub endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketMethod {
    AccountSubscribe,
    AccountUnsubscribe,
    ProgramSubscribe,
    ProgramUnsubscribe,
    SignatureSubscribe,
    SignatureUnsubscribe,
    LogsSubscribe,
    LogsUnsubscribe,
}

impl SocketMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountSubscribe => "accountSubscribe",
            Self::AccountUnsubscribe => "accountUnsubscribe",
            Self::ProgramSubscribe => "programSubscribe",
            Self::ProgramUnsubscribe => "programUnsubscribe",
            Self::SignatureSubscribe => "signatureSubscribe",
            Self::SignatureUnsubscribe => "signatureUnsubscribe",
            Self::LogsSubscribe => "logsSubscribe",
            Self::LogsUnsubscribe => "logsUnsubscribe",
        }
    }
}

impl std::fmt::Display for SocketMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four notification streams a subscription can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Account,
    Program,
    Signature,
    Logs,
}

impl SubscriptionKind {
    pub const ALL: [SubscriptionKind; 4] = [Self::Account, Self::Program, Self::Signature, Self::Logs];

    pub fn subscribe_method(&self) -> SocketMethod {
        match self {
            Self::Account => SocketMethod::AccountSubscribe,
            Self::Program => SocketMethod::ProgramSubscribe,
            Self::Signature => SocketMethod::SignatureSubscribe,
            Self::Logs => SocketMethod::LogsSubscribe,
        }
    }

    pub fn unsubscribe_method(&self) -> SocketMethod {
        match self {
            Self::Account => SocketMethod::AccountUnsubscribe,
            Self::Program => SocketMethod::ProgramUnsubscribe,
            Self::Signature => SocketMethod::SignatureUnsubscribe,
            Self::Logs => SocketMethod::LogsUnsubscribe,
        }
    }

    /// Method name the server uses when pushing notifications of this kind.
    pub fn notification_method(&self) -> &'static str {
        match self {
            Self::Account => "accountNotification",
            Self::Program => "programNotification",
            Self::Signature => "signatureNotification",
            Self::Logs => "logsNotification",
        }
    }

    /// Inverse of [`notification_method`](Self::notification_method).
    pub fn from_notification_method(method: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.notification_method() == method)
    }

    /// Fixed configuration appended as the last subscribe parameter.
    pub fn subscribe_config(&self) -> SubscribeConfig {
        let commitment = match self {
            Self::Account => Commitment::Recent,
            Self::Program | Self::Signature | Self::Logs => Commitment::Confirmed,
        };
        SubscribeConfig {
            commitment,
            encoding: Encoding::Base64,
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::Program => write!(f, "program"),
            Self::Signature => write!(f, "signature"),
            Self::Logs => write!(f, "logs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Recent,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Base64,
}

/// `{"commitment": ..., "encoding": ...}`, static per kind, never caller-supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeConfig {
    pub commitment: Commitment,
    pub encoding: Encoding,
}

/// Filter for `logsSubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogsFilter {
    /// Every transaction's logs (`"all"`).
    All,
    /// Only transactions mentioning one of these addresses.
    Mentions(Vec<String>),
}

impl LogsFilter {
    pub fn to_param(&self) -> Value {
        match self {
            Self::All => Value::String("all".into()),
            Self::Mentions(addresses) => serde_json::json!({ "mentions": addresses }),
        }
    }
}

/// Build the ordered parameter list for a subscribe call.
///
/// `target` is the pubkey / signature / logs filter; the static
/// [`SubscribeConfig`] of `kind` is appended last.
pub fn subscribe_params(kind: SubscriptionKind, target: Value) -> Result<Vec<Value>, serde_json::Error> {
    let config = serde_json::to_value(kind.subscribe_config())?;
    Ok(vec![target, config])
}

/// Parameters of every `*Unsubscribe` call: the server handle alone.
pub fn unsubscribe_params(handle: SocketHandle) -> Vec<Value> {
    vec![Value::from(handle)]
}
