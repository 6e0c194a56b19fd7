//! Shared fixtures for the integration tests: an in-memory publisher, a
//! canned policy store and a fully connected supervisor harness running on
//! the loopback transport.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use recruit_gateway::config::TenantConfig;
use recruit_gateway::error::{GatewayError, GatewayResult};
use recruit_gateway::event::{GatewayEvent, StreamTopic};
use recruit_gateway::identity::to_qualified;
use recruit_gateway::kafka::EventPublisher;
use recruit_gateway::policy::{PairPolicy, PolicyLookup};
use recruit_gateway::supervisor::{LogoutCallback, SessionSupervisor};
use recruit_gateway::transport::loopback::{LoopbackFactory, LoopbackTransport};
use recruit_gateway::transport::{MediaRef, MessageEvent, TransportFactory};

pub const TENANT: &str = "918496952149";
pub const APPLICANT: &str = "918050992006";

/// Publisher recording every emission instead of writing to Kafka.
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<(StreamTopic, String, GatewayEvent)>>,
    pub bytes: Mutex<Vec<(StreamTopic, String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn on_topic(&self, topic: StreamTopic) -> Vec<GatewayEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| *t == topic)
            .map(|(_, _, ev)| ev.clone())
            .collect()
    }

    pub fn keys_on_topic(&self, topic: StreamTopic) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| *t == topic)
            .map(|(_, key, _)| key.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.events.lock().unwrap().len() + self.bytes.lock().unwrap().len()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        event: &GatewayEvent,
        topic: StreamTopic,
        key: &str,
    ) -> GatewayResult<()> {
        self.events
            .lock()
            .unwrap()
            .push((topic, key.to_string(), event.clone()));
        Ok(())
    }

    async fn publish_bytes(
        &self,
        payload: &[u8],
        topic: StreamTopic,
        key: &str,
    ) -> GatewayResult<()> {
        self.bytes
            .lock()
            .unwrap()
            .push((topic, key.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Policy store returning one canned row (or a driver error).
pub struct StaticPolicyStore {
    pub policy: Mutex<PairPolicy>,
    pub fail: Mutex<bool>,
}

impl StaticPolicyStore {
    pub fn enabled_with_count(count: i32) -> Arc<Self> {
        Arc::new(Self {
            policy: Mutex::new(PairPolicy {
                recruiter_id: TENANT.to_string(),
                applicant_id: APPLICANT.to_string(),
                enabled: true,
                message_count: count,
            }),
            fail: Mutex::new(false),
        })
    }

    pub fn disabled() -> Arc<Self> {
        let store = Self::enabled_with_count(0);
        store.policy.lock().unwrap().enabled = false;
        store
    }

    pub fn failing() -> Arc<Self> {
        let store = Self::enabled_with_count(0);
        *store.fail.lock().unwrap() = true;
        store
    }
}

#[async_trait]
impl PolicyLookup for StaticPolicyStore {
    async fn lookup(&self, _recruiter_id: &str, _applicant_id: &str) -> GatewayResult<PairPolicy> {
        if *self.fail.lock().unwrap() {
            return Err(GatewayError::kafka("policy store unreachable"));
        }
        Ok(self.policy.lock().unwrap().clone())
    }
}

pub fn tenant_config(recruiter_id: &str) -> TenantConfig {
    TenantConfig {
        recruiter_id: recruiter_id.to_string(),
        host_client_type: "Chrome (Ubuntu)".to_string(),
        host_client_name: "Ubuntu".to_string(),
        allowed_media_types: vec!["text".to_string(), "image".to_string()],
        message_rate_limit: 10,
        enable: true,
    }
}

/// A connected supervisor wired to loopback transport and in-memory
/// collaborators.
pub struct Harness {
    pub supervisor: Arc<SessionSupervisor>,
    pub transport: Arc<LoopbackTransport>,
    pub publisher: Arc<RecordingPublisher>,
    pub logs_dir: tempfile::TempDir,
    pub logged_out: Arc<Mutex<Vec<String>>>,
}

pub async fn connect_harness(
    config: TenantConfig,
    policy: Arc<StaticPolicyStore>,
) -> Harness {
    let publisher = Arc::new(RecordingPublisher::default());
    let logs_dir = tempfile::tempdir().expect("temp logs dir");
    let logged_out = Arc::new(Mutex::new(Vec::new()));

    let factory = Arc::new(LoopbackFactory::new());
    let transport = LoopbackTransport::new(to_qualified(&config.recruiter_id));
    factory.register(config.recruiter_id.clone(), transport.clone());

    let logged_out_sink = Arc::clone(&logged_out);
    let on_logout: LogoutCallback = Arc::new(move |tenant_id: &str| {
        logged_out_sink.lock().unwrap().push(tenant_id.to_string());
    });

    let supervisor = Arc::new(SessionSupervisor::new(
        config,
        logs_dir.path().to_path_buf(),
        publisher.clone(),
        policy,
        on_logout,
    ));

    let factory: Arc<dyn TransportFactory> = factory;
    supervisor
        .clone()
        .connect(&factory, &[])
        .await
        .expect("loopback connect");

    Harness {
        supervisor,
        transport,
        publisher,
        logs_dir,
        logged_out,
    }
}

pub fn at(ts: &str) -> DateTime<Utc> {
    ts.parse().expect("timestamp literal")
}

pub fn text_message(sender: &str, chat: &str, extended: &str, conversation: &str) -> MessageEvent {
    MessageEvent {
        sender: sender.to_string(),
        chat: chat.to_string(),
        timestamp: at("2024-03-01T10:15:00Z"),
        kind: "text".to_string(),
        media_kind: String::new(),
        is_group: false,
        extended_text: extended.to_string(),
        conversation: conversation.to_string(),
        media: None,
    }
}

pub fn media_message(sender: &str, chat: &str, media_kind: &str, handle: &str, mime: &str) -> MessageEvent {
    MessageEvent {
        sender: sender.to_string(),
        chat: chat.to_string(),
        timestamp: at("2024-03-01T10:15:00Z"),
        kind: "media".to_string(),
        media_kind: media_kind.to_string(),
        is_group: false,
        extended_text: String::new(),
        conversation: String::new(),
        media: Some(MediaRef {
            handle: handle.to_string(),
            mime: mime.to_string(),
        }),
    }
}
