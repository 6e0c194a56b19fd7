//! Inbound filter and normalizer.
//!
//! Every transport event lands here via the supervisor's event task. Message
//! events run the full policy pipeline (content extraction, self-message
//! branch, per-pair policy checks) before emission; the remaining variants
//! take a fixed emission path. Blocking conditions are evaluated
//! non-exclusively; when several apply, the last assigned code is the one
//! retained on the event (precedence: membership, rate limit, group,
//! kind-allow).

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::event::{codes, GatewayEvent, StreamTopic};
use crate::identity::{to_bare, to_qualified};
use crate::policy::PairPolicy;
use crate::supervisor::SessionSupervisor;
use crate::transport::{
    BanEvent, CallEvent, ChatTransport, LogoutEvent, MessageEvent, PresenceEvent, TransportEvent,
};

impl SessionSupervisor {
    /// Entry point for every event raised by this tenant's transport.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        let transport = self.transport.read().unwrap().clone();
        let Some(transport) = transport else {
            warn!(recruiter = %self.tenant_id(), "Event received without an attached transport");
            return;
        };

        // Presence events only flow while we advertise ourselves available.
        if let Err(e) = transport.mark_available().await {
            warn!(error = %e, "Unable to set presence to available");
        }

        match event {
            TransportEvent::Message(message) => self.handle_message(&transport, message).await,
            TransportEvent::CallAccept(call) => self.handle_call("CallAccept", call).await,
            TransportEvent::CallOffer(call) => self.handle_call("CallOffer", call).await,
            TransportEvent::CallReject(call) => self.handle_call("CallReject", call).await,
            TransportEvent::ChatPresence(presence) => self.handle_chat_presence(presence).await,
            TransportEvent::LoggedOut(logout) => self.handle_logged_out(logout).await,
            TransportEvent::TemporaryBan(ban) => self.handle_temporary_ban(ban).await,
        }
    }

    async fn handle_message(
        &self,
        transport: &Arc<dyn ChatTransport>,
        message: MessageEvent,
    ) {
        let store_id = to_bare(&transport.device_id());
        let mut blocked = false;

        let mut event = GatewayEvent::new("Message", message.timestamp);
        event.sender_id = to_bare(&message.sender);
        event.receiver_id = store_id.clone();
        event.chat_id = message.chat.clone();
        event.is_group = message.is_group;
        event.media_kind = message.media_kind.clone();

        let key = event.partition_key();

        match message.kind.as_str() {
            "text" => {
                let body = if message.extended_text.is_empty() {
                    message.conversation.clone()
                } else {
                    message.extended_text.clone()
                };
                if body.is_empty() {
                    warn!(
                        recruiter = %self.tenant_id(),
                        error_code = codes::EMPTY_MESSAGE,
                        "Blocked: Empty message"
                    );
                    return;
                }
                event.kind = "text".to_string();
                event.content = Some(Value::String(body));
            }
            "media" => {
                let Some(media) = message.media.as_ref() else {
                    warn!(recruiter = %self.tenant_id(), "Media message without a payload reference");
                    return;
                };
                let data = match transport.download_media(media).await {
                    Ok(data) => data,
                    Err(e) => {
                        error!(error = %e, "Error downloading media");
                        return;
                    }
                };
                event.kind = match message.media_kind.as_str() {
                    "audio" | "ptt" => "audio".to_string(),
                    "image" => "image".to_string(),
                    "document" => "document".to_string(),
                    _ => {
                        warn!(media_kind = %message.media_kind, "Unsupported media type");
                        return;
                    }
                };
                event.mime_type = media.mime.clone();
                event.content = Some(Value::String(BASE64_STANDARD.encode(&data)));
            }
            _ => {}
        }

        if event.sender_id == store_id {
            blocked = true;
            if message.chat == to_qualified(self.tenant_id()) {
                // Tenant messaging their own account: the admin stream gets
                // an untagged copy before the code is stamped.
                if let Err(e) = self
                    .publisher
                    .publish(&event, StreamTopic::Admin, &key)
                    .await
                {
                    error!(
                        error = %e,
                        recruiter = %self.tenant_id(),
                        "Error sending message to admin topic"
                    );
                    return;
                }
                event.error_code = codes::SELF_MESSAGE_ADMIN.to_string();
                info!(
                    recruiter = %self.tenant_id(),
                    sender = %event.sender_id,
                    error_code = %event.error_code,
                    "[Redirect]: Reason: Self-message (Admin topic)"
                );
            } else {
                debug!(extracted = %to_bare(&message.chat), "Extracted applicant number from chat");
                event.receiver_id = to_bare(&message.chat);
                event.error_code = codes::RECRUITER_MANUAL_REACHOUT.to_string();
                info!(
                    recruiter = %self.tenant_id(),
                    sender = %event.sender_id,
                    error_code = %event.error_code,
                    "[Blocked]: Reason: Recruiter manual message to applicant"
                );
            }
        } else {
            let policy = match self.policy.lookup(self.tenant_id(), &event.sender_id).await {
                Ok(policy) => policy,
                Err(e) => {
                    error!(error = %e, "Issue while reading the pair policy, using defaults");
                    PairPolicy::default_for(self.tenant_id(), &event.sender_id)
                }
            };
            debug!(?policy, "Pair policy resolved");

            if !policy.enabled {
                blocked = true;
                event.error_code = codes::BLOCKED_SENDER.to_string();
                warn!(
                    recruiter = %self.tenant_id(),
                    sender = %event.sender_id,
                    error_code = %event.error_code,
                    "[Blocked]: Reason: Sender ID not allowed"
                );
            }

            if policy.message_count >= self.config.message_rate_limit {
                blocked = true;
                event.error_code = codes::RATE_LIMIT_EXCEEDED.to_string();
                warn!(
                    recruiter = %self.tenant_id(),
                    sender = %event.sender_id,
                    error_code = %event.error_code,
                    "[Blocked]: Reason: Messages to this chat have exceeded the rate limit"
                );
            }

            if message.is_group {
                blocked = true;
                event.error_code = codes::GROUP_MESSAGE.to_string();
                warn!(
                    recruiter = %self.tenant_id(),
                    chat = %message.chat,
                    error_code = %event.error_code,
                    "[Blocked]: Reason: Group message"
                );
            }

            let allowed = &self.config.allowed_media_types;
            let kind_allowed = (message.kind == "media"
                && allowed.iter().any(|k| *k == message.media_kind))
                || allowed.iter().any(|k| *k == message.kind);
            if !kind_allowed {
                blocked = true;
                event.error_code = codes::DISALLOWED_MESSAGE_TYPE.to_string();
                warn!(
                    recruiter = %self.tenant_id(),
                    msg_type = %message.kind,
                    media_type = %message.media_kind,
                    error_code = %event.error_code,
                    "[Blocked]: Reason: Disallowed message type"
                );
            }
        }

        info!(
            event_type = %event.event_type,
            timestamp = %event.timestamp,
            sender = %event.sender_id,
            receiver = %event.receiver_id,
            chat = %event.chat_id,
            msg_type = %message.kind,
            media_type = %message.media_kind,
            "EVENT received"
        );

        if !blocked {
            if let Err(e) = self
                .publisher
                .publish(&event, StreamTopic::Ingest, &key)
                .await
            {
                error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
                return;
            }
            info!(recruiter = %self.tenant_id(), "Message sent to [Ingest] topic");
        }

        if let Err(e) = self.publisher.publish(&event, StreamTopic::Raw, &key).await {
            error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
        }
    }

    async fn handle_call(&self, event_type: &str, call: CallEvent) {
        let mut event = GatewayEvent::new(event_type, call.timestamp);
        event.sender_id = to_bare(&call.from);
        event.receiver_id = self.store_id();
        event.chat_id = call.call_id;

        let key = event.partition_key();
        if let Err(e) = self.publisher.publish(&event, StreamTopic::Raw, &key).await {
            error!(
                error = %e,
                event = %event_type,
                recruiter = %self.tenant_id(),
                "Error sending message"
            );
        }
    }

    async fn handle_chat_presence(&self, presence: PresenceEvent) {
        debug!(media = %presence.media, "Presence media label");
        let label = if presence.media.is_empty() {
            "text"
        } else {
            presence.media.as_str()
        };

        let mut event = GatewayEvent::new("ChatPresence", Utc::now());
        event.sender_id = to_bare(&presence.sender);
        event.receiver_id = self.store_id();
        event.chat_id = presence.chat.clone();
        event.kind = format!("{label}Presence");
        event.content = Some(Value::String(presence.state.clone()));

        let key = event.partition_key();
        if let Err(e) = self.publisher.publish(&event, StreamTopic::Raw, &key).await {
            error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
            return;
        }
        if let Err(e) = self
            .publisher
            .publish(&event, StreamTopic::Ingest, &key)
            .await
        {
            error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
            return;
        }
        debug!(
            state = %presence.state,
            msg_type = %event.kind,
            recruiter = %self.tenant_id(),
            applicant = %event.sender_id,
            "[UserTyping] Received typing indicator"
        );
    }

    async fn handle_logged_out(&self, logout: LogoutEvent) {
        let store_id = self.store_id();

        let mut event = GatewayEvent::new("LoggedOut", Utc::now());
        event.sender_id = store_id.clone();
        event.receiver_id = store_id.clone();
        event.chat_id = store_id;
        event.error_code = logout.code.clone();
        event.content = Some(Value::String(logout.reason.clone()));

        let key = event.partition_key();
        if let Err(e) = self
            .publisher
            .publish(&event, StreamTopic::Failed, &key)
            .await
        {
            error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
            return;
        }
        info!(
            logout_code = %logout.code,
            reason = %logout.reason,
            recruiter = %self.tenant_id(),
            "[Logout]"
        );
        if let Err(e) = self.publisher.publish(&event, StreamTopic::Raw, &key).await {
            error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
            return;
        }

        self.handle_logout().await;
        debug!(recruiter = %self.tenant_id(), "[Logout successful]");
    }

    async fn handle_temporary_ban(&self, ban: BanEvent) {
        let store_id = self.store_id();

        let mut event = GatewayEvent::new("TemporaryBan", Utc::now());
        event.sender_id = store_id.clone();
        event.receiver_id = store_id.clone();
        event.chat_id = store_id;
        event.error_code = ban.code.clone();
        event.content = Some(Value::String(ban.expire.clone()));

        let key = event.partition_key();
        info!(
            ban_code = %ban.code,
            expiry = %ban.expire,
            recruiter = %self.tenant_id(),
            "[Temporary Ban]"
        );
        if let Err(e) = self.publisher.publish(&event, StreamTopic::Raw, &key).await {
            error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
            return;
        }
        if let Err(e) = self
            .publisher
            .publish(&event, StreamTopic::Failed, &key)
            .await
        {
            error!(error = %e, recruiter = %self.tenant_id(), "Error sending message");
        }
    }
}
