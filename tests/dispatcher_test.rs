mod test_utils;

use std::sync::Arc;

use recruit_gateway::dispatcher::dispatch_record;
use recruit_gateway::fleet::Registry;
use recruit_gateway::identity::to_qualified;
use recruit_gateway::transport::loopback::SentItem;

use test_utils::*;

async fn registry_with_harness() -> (Arc<Registry>, Harness) {
    let harness =
        connect_harness(tenant_config(TENANT), StaticPolicyStore::enabled_with_count(0)).await;
    let registry = Arc::new(Registry::new());
    registry.insert(TENANT.to_string(), harness.supervisor.clone());
    (registry, harness)
}

fn outbound_text(tenant: &str, peer: &str, chat: &str, body: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event_type": "Message",
        "timestamp": "2024-03-01T12:00:00Z",
        "sender_id": tenant,
        "receiver_id": peer,
        "chat_id": chat,
        "mid": "reply-1",
        "msg_type": "text",
        "content": body,
    }))
    .unwrap()
}

#[tokio::test]
async fn outbound_text_round_trips_to_exactly_one_send() {
    let (registry, harness) = registry_with_harness().await;
    let chat = to_qualified(APPLICANT);

    let record = outbound_text(TENANT, APPLICANT, &chat, "thanks for applying");
    dispatch_record(&record, &registry).await;

    let sent = harness.transport.sent();
    assert_eq!(
        sent,
        vec![SentItem::Text {
            chat: chat.clone(),
            body: "thanks for applying".to_string(),
        }]
    );
}

#[tokio::test]
async fn missing_tenant_skips_the_record() {
    let registry = Registry::new();
    let record = outbound_text("919999999999", APPLICANT, &to_qualified(APPLICANT), "hi");
    // Must not panic and must not wedge; the record is just dropped.
    dispatch_record(&record, &registry).await;
}

#[tokio::test]
async fn typing_record_invokes_typing_indicator() {
    let (registry, harness) = registry_with_harness().await;
    let chat = to_qualified(APPLICANT);

    let record = serde_json::to_vec(&serde_json::json!({
        "event_type": "Message",
        "timestamp": "2024-03-01T12:00:00Z",
        "sender_id": TENANT,
        "receiver_id": APPLICANT,
        "chat_id": chat,
        "mid": "t-1",
        "msg_type": "typing",
    }))
    .unwrap();
    dispatch_record(&record, &registry).await;

    assert_eq!(harness.transport.sent(), vec![SentItem::Typing { chat }]);
}

#[tokio::test]
async fn image_record_decodes_transport_payload() {
    let (registry, harness) = registry_with_harness().await;
    let chat = to_qualified(APPLICANT);

    let record = serde_json::to_vec(&serde_json::json!({
        "event_type": "Message",
        "timestamp": "2024-03-01T12:00:00Z",
        "sender_id": TENANT,
        "receiver_id": APPLICANT,
        "chat_id": chat,
        "mid": "i-1",
        "msg_type": "image",
        "content": {
            "url": "https://cdn.example/img",
            "mimetype": "image/png",
            "caption": "offer letter",
            "file_sha256": "abc123"
        },
    }))
    .unwrap();
    dispatch_record(&record, &registry).await;

    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        SentItem::Image { chat: sent_chat, payload } => {
            assert_eq!(sent_chat, &chat);
            assert_eq!(payload.url.as_deref(), Some("https://cdn.example/img"));
            assert_eq!(payload.mimetype.as_deref(), Some("image/png"));
            assert_eq!(payload.caption.as_deref(), Some("offer letter"));
            assert_eq!(payload.extra.get("file_sha256").unwrap(), "abc123");
        }
        other => panic!("expected image send, got {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_kind_is_skipped() {
    let (registry, harness) = registry_with_harness().await;

    let record = serde_json::to_vec(&serde_json::json!({
        "event_type": "Message",
        "timestamp": "2024-03-01T12:00:00Z",
        "sender_id": TENANT,
        "receiver_id": APPLICANT,
        "chat_id": to_qualified(APPLICANT),
        "mid": "x-1",
        "msg_type": "location",
        "content": "somewhere",
    }))
    .unwrap();
    dispatch_record(&record, &registry).await;

    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn malformed_record_is_swallowed() {
    let (registry, harness) = registry_with_harness().await;

    dispatch_record(b"{not json", &registry).await;
    dispatch_record(b"{}", &registry).await;

    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn content_decode_failure_sends_nothing() {
    let (registry, harness) = registry_with_harness().await;

    // Text content must be a JSON string; an object cannot decode.
    let record = serde_json::to_vec(&serde_json::json!({
        "event_type": "Message",
        "timestamp": "2024-03-01T12:00:00Z",
        "sender_id": TENANT,
        "receiver_id": APPLICANT,
        "chat_id": to_qualified(APPLICANT),
        "mid": "b-1",
        "msg_type": "text",
        "content": {"oops": true},
    }))
    .unwrap();
    dispatch_record(&record, &registry).await;

    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn send_error_does_not_poison_later_records() {
    let (registry, harness) = registry_with_harness().await;
    let chat = to_qualified(APPLICANT);

    harness.transport.fail_sends();
    dispatch_record(&outbound_text(TENANT, APPLICANT, &chat, "first"), &registry).await;
    assert!(harness.transport.sent().is_empty());

    // Later records still dispatch once the transport recovers.
    let harness2 =
        connect_harness(tenant_config(TENANT), StaticPolicyStore::enabled_with_count(0)).await;
    registry.insert(TENANT.to_string(), harness2.supervisor.clone());
    dispatch_record(&outbound_text(TENANT, APPLICANT, &chat, "second"), &registry).await;
    assert_eq!(harness2.transport.sent().len(), 1);
}

#[tokio::test]
async fn disconnected_supervisor_fails_fast_without_send() {
    let (registry, harness) = registry_with_harness().await;
    harness.supervisor.disconnect().await;

    let record = outbound_text(TENANT, APPLICANT, &to_qualified(APPLICANT), "late");
    dispatch_record(&record, &registry).await;

    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn malformed_chat_address_is_a_parse_failure() {
    let (registry, harness) = registry_with_harness().await;

    let record = outbound_text(TENANT, APPLICANT, "not-an-address", "hi");
    dispatch_record(&record, &registry).await;

    assert!(harness.transport.sent().is_empty());
}
