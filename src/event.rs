use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error and info codes stamped on normalized events by the inbound
/// pipeline. Closed set; values travel as UPPER_SNAKE strings on the wire.
pub mod codes {
    pub const SELF_MESSAGE: &str = "SELF_MESSAGE";
    pub const GROUP_MESSAGE: &str = "GROUP_MESSAGE";
    pub const BLOCKED_SENDER: &str = "BLOCKED_SENDER";
    pub const DISALLOWED_MESSAGE_TYPE: &str = "DISALLOWED_MESSAGE_TYPE";
    pub const EMPTY_MESSAGE: &str = "EMPTY_MESSAGE";
    pub const RATE_LIMIT_EXCEEDED: &str = "EXCEEDED_MESSAGE_RATE_LIMIT";
    pub const USER_NOT_ENABLED: &str = "USER_NOT_ENABLED";
    pub const SELF_MESSAGE_ADMIN: &str = "SELF_MESSAGE_ADMIN";
    pub const RECRUITER_MANUAL_REACHOUT: &str = "RECRUITER_MANUAL_REACHOUT";
}

/// Logical stream a normalized event is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTopic {
    /// Lossless audit stream; every inbound and outbound record lands here.
    Raw,
    /// Filtered inbound stream consumed by downstream business logic.
    Ingest,
    /// The tenant's self-to-self messages.
    Admin,
    /// Logout and ban events.
    Failed,
}

impl StreamTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamTopic::Raw => "raw",
            StreamTopic::Ingest => "ingest",
            StreamTopic::Admin => "admin",
            StreamTopic::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StreamTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized event: the wire shape published on every internal stream.
///
/// `message_id` is assigned by the gateway on ingress and never copied from
/// the transport. `sender_id` and `receiver_id` are bare identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
    pub receiver_id: String,
    pub chat_id: String,
    #[serde(rename = "mid")]
    pub message_id: String,
    #[serde(rename = "msg_type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(rename = "media_type", default, skip_serializing_if = "String::is_empty")]
    pub media_kind: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(rename = "mime_type", default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl GatewayEvent {
    /// Start a normalized event of the given type with a fresh gateway
    /// message id. Remaining fields default to empty.
    pub fn new(event_type: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp,
            sender_id: String::new(),
            receiver_id: String::new(),
            chat_id: String::new(),
            message_id: new_message_id(),
            kind: String::new(),
            media_kind: String::new(),
            is_group: false,
            content: None,
            mime_type: String::new(),
            error_code: String::new(),
        }
    }

    /// Partition key shared by all inbound emissions of this event.
    /// Stable per ordered (receiver, sender) pair so one partition observes
    /// per-conversation order.
    pub fn partition_key(&self) -> String {
        format!("{}_{}", self.receiver_id, self.sender_id)
    }
}

/// Compact gateway-assigned message id: a v4 UUID in URL-safe base64,
/// fixed 22 characters.
pub fn new_message_id() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}
