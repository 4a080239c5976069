//! Packet bodies: the RPC and pub/sub messages exchanged with a client.
//!
//! Bodies are JSON, internally tagged by `kind`. Binary payloads never
//! appear inline; a body refers to them by an attachment reference
//! string (`"rca.bin.<index>"`) resolved against the packet's
//! attachment list.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RcaError;

/// Topic carrying every published frame of a connection.
pub const STREAM_TOPIC: &str = "rca.topic.stream";

const ATTACHMENT_PREFIX: &str = "rca.bin.";

// ── Message ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    /// Remote procedure call; answered by `Result` or `Error` with the same id.
    Call {
        id: u64,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Result {
        id: u64,
        #[serde(default)]
        result: Value,
    },
    Error { id: u64, error: String },
    /// Fire-and-forget event on a named topic.
    Publish { topic: String, data: Value },
}

impl Message {
    pub fn call(id: u64, method: RpcMethod, args: Vec<Value>) -> Self {
        Message::Call {
            id,
            method: method.as_str().to_string(),
            args,
        }
    }

    /// Reply to call `id` with the outcome of handling it.
    pub fn reply(id: u64, outcome: Result<Value, RcaError>) -> Self {
        match outcome {
            Ok(result) => Message::Result { id, result },
            Err(e) => Message::Error {
                id,
                error: e.to_string(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Call { .. } => "call",
            Message::Result { .. } => "result",
            Message::Error { .. } => "error",
            Message::Publish { .. } => "publish",
        }
    }
}

// ── RpcMethod ────────────────────────────────────────────────────

/// Methods exported by a stream registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// `rca.size(areaName, origin, {w, h, p})`
    Size,
    /// `rca.push(areaName, metadata)` with the frame as attachment 0.
    Push,
    /// `rca.event(areaName, origin, event)`
    Event,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 3] = [RpcMethod::Size, RpcMethod::Push, RpcMethod::Event];

    pub fn as_str(self) -> &'static str {
        match self {
            RpcMethod::Size => "rca.size",
            RpcMethod::Push => "rca.push",
            RpcMethod::Event => "rca.event",
        }
    }
}

impl TryFrom<&str> for RpcMethod {
    type Error = RcaError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        RpcMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == value)
            .ok_or_else(|| RcaError::UnknownMethod(value.to_string()))
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Attachment references ────────────────────────────────────────

/// Reference string for the attachment at `index`.
pub fn attachment_ref(index: usize) -> String {
    format!("{ATTACHMENT_PREFIX}{index}")
}

/// Index named by an attachment reference, if `value` is one.
pub fn parse_attachment_ref(value: &str) -> Option<usize> {
    value.strip_prefix(ATTACHMENT_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_wire_shape() {
        let msg = Message::call(7, RpcMethod::Size, vec![json!("view"), json!("o"), json!({"w": 10})]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "call");
        assert_eq!(value["method"], "rca.size");
        assert_eq!(value["args"][0], "view");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn reply_carries_error_text() {
        let msg = Message::reply(3, Err(RcaError::UnknownMethod("rca.nope".into())));
        assert_eq!(
            msg,
            Message::Error {
                id: 3,
                error: "unknown method: rca.nope".into()
            }
        );
        assert_eq!(msg.kind(), "error");
    }

    #[test]
    fn missing_args_default_to_empty() {
        let msg: Message = serde_json::from_str(r#"{"kind":"call","id":1,"method":"rca.push"}"#).unwrap();
        assert!(matches!(msg, Message::Call { ref args, .. } if args.is_empty()));
    }

    #[test]
    fn method_names() {
        for method in RpcMethod::ALL {
            assert_eq!(RpcMethod::try_from(method.as_str()).unwrap(), method);
        }
        assert!(matches!(
            RpcMethod::try_from("rca.resize"),
            Err(RcaError::UnknownMethod(_))
        ));
    }

    #[test]
    fn attachment_refs() {
        assert_eq!(attachment_ref(0), "rca.bin.0");
        assert_eq!(parse_attachment_ref("rca.bin.12"), Some(12));
        assert_eq!(parse_attachment_ref("rca.bin.x"), None);
        assert_eq!(parse_attachment_ref("data:0"), None);
    }
}
