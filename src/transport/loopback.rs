//! In-process transport used when no external chat client is linked.
//!
//! Sessions accept every operation and record outbound sends; inbound events
//! are injected through [`LoopbackTransport::inject`]. The integration tests
//! drive the whole gateway through this implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    AudioPayload, ChatAddress, ChatTransport, DeviceIdentity, DocumentPayload, ImagePayload,
    MediaRef, MessageEvent, PairingEvent, TransportError, TransportEvent, TransportFactory,
};
use crate::identity::to_qualified;

/// A recorded outbound operation, for assertions and audit.
#[derive(Debug, Clone, PartialEq)]
pub enum SentItem {
    Text { chat: String, body: String },
    Image { chat: String, payload: ImagePayload },
    Audio { chat: String, payload: AudioPayload },
    Document { chat: String, payload: DocumentPayload },
    Typing { chat: String },
}

pub struct LoopbackTransport {
    device_id: String,
    connected: AtomicBool,
    logged_out: AtomicBool,
    sent: Mutex<Vec<SentItem>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    pairing_rx: Mutex<Option<mpsc::UnboundedReceiver<PairingEvent>>>,
    /// When set, `pair_phone` reports failure so the QR fallback path runs.
    refuse_pairing: AtomicBool,
    /// When set, every send reports failure.
    fail_sends: AtomicBool,
    /// Media payload served by `download_media`, keyed by handle.
    media: Mutex<HashMap<String, Vec<u8>>>,
}

impl LoopbackTransport {
    pub fn new(device_id: impl Into<String>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            device_id: device_id.into(),
            connected: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            pairing_rx: Mutex::new(None),
            refuse_pairing: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            media: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a scripted pairing channel; the supervisor's authentication
    /// task will consume these events in order.
    pub fn with_pairing_script(&self, script: Vec<PairingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        for ev in script {
            let _ = tx.send(ev);
        }
        *self.pairing_rx.lock().unwrap() = Some(rx);
    }

    pub fn refuse_pairing(&self) {
        self.refuse_pairing.store(true, Ordering::SeqCst);
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Register media bytes retrievable through `download_media`.
    pub fn stage_media(&self, handle: impl Into<String>, bytes: Vec<u8>) {
        self.media.lock().unwrap().insert(handle.into(), bytes);
    }

    /// Push an inbound event into the session's event stream.
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Convenience for the common case of injecting a message event.
    pub fn inject_message(&self, message: MessageEvent) {
        self.inject(TransportEvent::Message(message));
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    fn record(&self, item: SentItem) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("loopback send failure".into()));
        }
        self.sent.lock().unwrap().push(item);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for LoopbackTransport {
    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn pair_phone(&self, number: &str, _client_label: &str) -> Result<String, TransportError> {
        if self.refuse_pairing.load(Ordering::SeqCst) {
            return Err(TransportError::Pairing(format!(
                "pairing refused for {number}"
            )));
        }
        Ok("LOOP-CODE".to_string())
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    fn pairing_events(&self) -> Option<mpsc::UnboundedReceiver<PairingEvent>> {
        self.pairing_rx.lock().unwrap().take()
    }

    async fn mark_available(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError> {
        self.media
            .lock()
            .unwrap()
            .get(&media.handle)
            .cloned()
            .ok_or_else(|| TransportError::Download(format!("no media for {}", media.handle)))
    }

    async fn send_text(&self, chat: &ChatAddress, text: &str) -> Result<(), TransportError> {
        self.record(SentItem::Text {
            chat: chat.to_string(),
            body: text.to_string(),
        })
    }

    async fn send_image(
        &self,
        chat: &ChatAddress,
        payload: &ImagePayload,
    ) -> Result<(), TransportError> {
        self.record(SentItem::Image {
            chat: chat.to_string(),
            payload: payload.clone(),
        })
    }

    async fn send_audio(
        &self,
        chat: &ChatAddress,
        payload: &AudioPayload,
    ) -> Result<(), TransportError> {
        self.record(SentItem::Audio {
            chat: chat.to_string(),
            payload: payload.clone(),
        })
    }

    async fn send_document(
        &self,
        chat: &ChatAddress,
        payload: &DocumentPayload,
    ) -> Result<(), TransportError> {
        self.record(SentItem::Document {
            chat: chat.to_string(),
            payload: payload.clone(),
        })
    }

    async fn send_typing(&self, chat: &ChatAddress) -> Result<(), TransportError> {
        self.record(SentItem::Typing {
            chat: chat.to_string(),
        })
    }
}

/// Factory handing out loopback sessions. Tests pre-register sessions per
/// tenant to keep a handle for injection and assertions.
#[derive(Default)]
pub struct LoopbackFactory {
    devices: Mutex<Vec<DeviceIdentity>>,
    sessions: Mutex<HashMap<String, Arc<LoopbackTransport>>>,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a persisted device identity, as if the transport library had
    /// stored it in a previous run.
    pub fn seed_device(&self, id: impl Into<String>) {
        self.devices
            .lock()
            .unwrap()
            .push(DeviceIdentity { id: id.into() });
    }

    /// Pre-register the session returned for `tenant_id`.
    pub fn register(&self, tenant_id: impl Into<String>, transport: Arc<LoopbackTransport>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(tenant_id.into(), transport);
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn stored_devices(&self) -> Result<Vec<DeviceIdentity>, TransportError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn open_session(
        &self,
        tenant_id: &str,
        device: Option<&DeviceIdentity>,
        _os_label: &str,
    ) -> Result<Arc<dyn ChatTransport>, TransportError> {
        if let Some(existing) = self.sessions.lock().unwrap().get(tenant_id) {
            return Ok(existing.clone());
        }
        let device_id = device
            .map(|d| d.id.clone())
            .unwrap_or_else(|| to_qualified(tenant_id));
        let transport = LoopbackTransport::new(device_id);
        self.sessions
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), transport.clone());
        Ok(transport)
    }
}
