//! Outbound dispatcher: one background task consuming the dispatch stream
//! and demultiplexing each record onto the owning tenant's session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::event::StreamTopic;
use crate::fleet::Registry;
use crate::kafka::{EventPublisher, OutputConsumer};
use crate::transport::{AudioPayload, DocumentPayload, ImagePayload};

/// Header subset of an outbound dispatch record.
///
/// Downstream producers write these records from the tenant's perspective:
/// the JSON `sender_id` names the tenant whose session must transmit, and
/// `receiver_id` names the remote peer. The fields are renamed here so the
/// routing code reads unambiguously.
#[derive(Debug, Deserialize)]
pub struct OutboundRecord {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// Transmitting tenant (JSON field `sender_id`).
    #[serde(rename = "sender_id")]
    pub tenant_id: String,
    /// Remote peer (JSON field `receiver_id`).
    #[serde(rename = "receiver_id", default)]
    pub peer_id: String,
    pub chat_id: String,
    #[serde(rename = "mid", default)]
    pub message_id: String,
    #[serde(rename = "msg_type", default)]
    pub kind: String,
    #[serde(rename = "media_type", default)]
    pub media_kind: String,
    #[serde(default)]
    pub is_group: bool,
    /// Kind-specific body, decoded only at dispatch time.
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(rename = "mime_type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub error_code: String,
}

pub struct OutboundDispatcher {
    consumer: OutputConsumer,
    registry: Arc<Registry>,
    publisher: Arc<dyn EventPublisher>,
    shutdown: watch::Receiver<bool>,
}

impl OutboundDispatcher {
    pub fn new(
        consumer: OutputConsumer,
        registry: Arc<Registry>,
        publisher: Arc<dyn EventPublisher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            consumer,
            registry,
            publisher,
            shutdown,
        }
    }

    /// Consume dispatch records until shutdown. Read errors are logged and
    /// the loop continues; only cancellation ends it.
    pub async fn run(mut self) {
        info!("Starting outbound dispatch loop");
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("Context is cancelled as shutdown is in progress");
                    break;
                }
                received = self.consumer.recv() => {
                    let bytes = match received {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            error!(error = %e, "Error reading message from Kafka");
                            continue;
                        }
                    };
                    debug!(len = bytes.len(), "Received outbound record");

                    // Audit copy of every outbound intent, under a random
                    // key so it is independent of per-tenant ordering.
                    let audit_key = Uuid::new_v4().to_string();
                    if let Err(e) = self
                        .publisher
                        .publish_bytes(&bytes, StreamTopic::Raw, &audit_key)
                        .await
                    {
                        error!(error = %e, "Error sending outbound audit copy to Kafka");
                    }

                    dispatch_record(&bytes, &self.registry).await;
                }
            }
        }
    }
}

/// Route one outbound record to the supervisor for its tenant and invoke the
/// kind-specific send. A record whose tenant has no live session is skipped;
/// decode and send failures are logged and never poison the loop.
pub async fn dispatch_record(bytes: &[u8], registry: &Registry) {
    let record: OutboundRecord = match serde_json::from_slice(bytes) {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, "Error unmarshaling outbound payload");
            return;
        }
    };
    debug!(
        tenant = %record.tenant_id,
        chat = %record.chat_id,
        msg_type = %record.kind,
        mid = %record.message_id,
        "Dispatching outbound record"
    );

    let Some(supervisor) = registry.get(&record.tenant_id) else {
        error!(
            tenant = %record.tenant_id,
            "Client manager not found for outbound record, skipping"
        );
        return;
    };

    match record.kind.as_str() {
        "text" => {
            if let Some(content) = record.content {
                if let Ok(text) = serde_json::from_value::<String>(content) {
                    if let Err(e) = supervisor.send_text(&record.chat_id, &text).await {
                        error!(
                            error = %e,
                            tenant = %record.tenant_id,
                            "Failed to send text message"
                        );
                    }
                }
            }
        }
        "image" => {
            if let Some(content) = record.content {
                if let Ok(payload) = serde_json::from_value::<ImagePayload>(content) {
                    if let Err(e) = supervisor.send_image(&record.chat_id, &payload).await {
                        error!(
                            error = %e,
                            tenant = %record.tenant_id,
                            "Failed to send image message"
                        );
                    }
                }
            }
        }
        "audio" => {
            if let Some(content) = record.content {
                if let Ok(payload) = serde_json::from_value::<AudioPayload>(content) {
                    if let Err(e) = supervisor.send_audio(&record.chat_id, &payload).await {
                        error!(
                            error = %e,
                            tenant = %record.tenant_id,
                            "Failed to send audio message"
                        );
                    }
                }
            }
        }
        "document" => {
            if let Some(content) = record.content {
                if let Ok(payload) = serde_json::from_value::<DocumentPayload>(content) {
                    if let Err(e) = supervisor.send_document(&record.chat_id, &payload).await {
                        error!(
                            error = %e,
                            tenant = %record.tenant_id,
                            "Failed to send document message"
                        );
                    }
                }
            }
        }
        "typing" => {
            if let Err(e) = supervisor.send_typing(&record.chat_id).await {
                error!(error = %e, tenant = %record.tenant_id, "Failed to send typing indicator");
            }
        }
        other => {
            error!(msg_type = %other, "Unsupported msg_type in outbound record");
        }
    }
}
