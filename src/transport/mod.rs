//! Seam to the external chat transport library.
//!
//! The gateway never speaks the IM wire protocol itself; it drives an opaque
//! session client through [`ChatTransport`] and receives typed events back.
//! A production deployment plugs the real client in behind
//! [`TransportFactory`]; the in-process [`loopback`] implementation backs the
//! test suite and transport-less integration runs.

pub mod loopback;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("invalid chat address: {0}")]
    Address(String),

    #[error("pairing rejected: {0}")]
    Pairing(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("media download failed: {0}")]
    Download(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// A parsed chat address (`user@server`).
///
/// The user part may still carry a device suffix (`91849...:12`); bare-id
/// extraction is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAddress {
    pub user: String,
    pub server: String,
}

impl ChatAddress {
    pub fn parse(addr: &str) -> Result<Self, TransportError> {
        let (user, server) = addr
            .split_once('@')
            .ok_or_else(|| TransportError::Address(addr.to_string()))?;
        if user.is_empty() || server.is_empty() {
            return Err(TransportError::Address(addr.to_string()));
        }
        Ok(Self {
            user: user.to_string(),
            server: server.to_string(),
        })
    }
}

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

/// A device identity persisted by the transport library between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Identifier as persisted by the transport store: the bare number,
    /// possibly device-suffixed (`91849...:12`).
    pub id: String,
}

/// Events emitted on the pairing channel while a session authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A fresh pairing code to surface to the operator.
    Code(String),
    Success,
    Timeout,
}

/// Opaque media handle attached to an inbound media message; passed back to
/// the transport to fetch the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub handle: String,
    /// MIME type reported by the sub-message header.
    pub mime: String,
}

/// Inbound message event as surfaced by the transport.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Sender address (qualified or device-suffixed).
    pub sender: String,
    /// Chat address the message arrived in.
    pub chat: String,
    pub timestamp: DateTime<Utc>,
    /// Top-level content discriminator: `text`, `media`, ...
    pub kind: String,
    /// Media sub-kind (`audio`, `ptt`, `image`, `document`); empty for text.
    pub media_kind: String,
    pub is_group: bool,
    /// Body of an extended text message, when present.
    pub extended_text: String,
    /// Plain conversation body, when present.
    pub conversation: String,
    pub media: Option<MediaRef>,
}

#[derive(Debug, Clone)]
pub struct CallEvent {
    pub from: String,
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub sender: String,
    pub chat: String,
    /// Media label of the composing state; empty for plain text typing.
    pub media: String,
    /// Presence state (`composing`, `paused`, ...).
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct LogoutEvent {
    /// Numeric reason code as reported by the transport (e.g. `401`).
    pub code: String,
    /// Human-readable reason (e.g. `Removed from device`).
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BanEvent {
    pub code: String,
    /// Ban expiry duration, as formatted by the transport.
    pub expire: String,
}

/// Typed event stream delivered by a live session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(MessageEvent),
    CallAccept(CallEvent),
    CallOffer(CallEvent),
    CallReject(CallEvent),
    ChatPresence(PresenceEvent),
    LoggedOut(LogoutEvent),
    TemporaryBan(BanEvent),
}

/// Outbound image payload, decoded from a dispatch record. Fields beyond the
/// ones the gateway inspects are carried opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptt: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One authenticated (or authenticating) session against the chat network.
///
/// Implementations must be safe to share across tasks; sends may race a
/// disconnect and are expected to fail fast rather than block.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Device identity backing this session, possibly device-suffixed.
    fn device_id(&self) -> String;

    /// Open the network connection. Pairing progress arrives on the pairing
    /// channel afterwards.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self);

    /// Invalidate the device identity on the network side.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Request phone-number pairing; returns the login code on success.
    async fn pair_phone(&self, number: &str, client_label: &str) -> Result<String, TransportError>;

    /// Take the inbound event stream. Yields `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Take the pairing event stream. `None` when the session resumed from a
    /// persisted device and no pairing is required (or after the first call).
    fn pairing_events(&self) -> Option<mpsc::UnboundedReceiver<PairingEvent>>;

    /// Advertise this session as available so presence events flow.
    async fn mark_available(&self) -> Result<(), TransportError>;

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError>;

    async fn send_text(&self, chat: &ChatAddress, text: &str) -> Result<(), TransportError>;
    async fn send_image(&self, chat: &ChatAddress, payload: &ImagePayload)
        -> Result<(), TransportError>;
    async fn send_audio(&self, chat: &ChatAddress, payload: &AudioPayload)
        -> Result<(), TransportError>;
    async fn send_document(
        &self,
        chat: &ChatAddress,
        payload: &DocumentPayload,
    ) -> Result<(), TransportError>;
    async fn send_typing(&self, chat: &ChatAddress) -> Result<(), TransportError>;
}

/// Constructs transport sessions and enumerates persisted device identities.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn stored_devices(&self) -> Result<Vec<DeviceIdentity>, TransportError>;

    /// Open a session for `tenant_id`, resuming from `device` when one is
    /// given, otherwise registering a new device advertised as `os_label`.
    async fn open_session(
        &self,
        tenant_id: &str,
        device: Option<&DeviceIdentity>,
        os_label: &str,
    ) -> Result<std::sync::Arc<dyn ChatTransport>, TransportError>;
}
