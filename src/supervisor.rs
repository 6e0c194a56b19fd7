use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info};

use crate::config::TenantConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::identity::to_bare;
use crate::kafka::EventPublisher;
use crate::policy::PolicyLookup;
use crate::transport::{
    AudioPayload, ChatAddress, ChatTransport, DeviceIdentity, DocumentPayload, ImagePayload,
    PairingEvent, TransportError, TransportFactory,
};

/// Client label offered during phone pairing before validation against the
/// tenant's configured allow.
const DEFAULT_CLIENT_LABEL: &str = "Chrome (Ubuntu)";

const PHONE_MIN_LEN: usize = 10;
const PHONE_MAX_LEN: usize = 15;

/// Lifecycle of a tenant session. Terminated supervisors are removed from
/// the fleet registry and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connecting,
    Live,
    Terminated,
}

/// Invoked once when the transport reports a logout, so the fleet can drop
/// this supervisor from its registry.
pub type LogoutCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Owner of one tenant's transport session: authentication, liveness, event
/// intake and outbound sends.
pub struct SessionSupervisor {
    pub(crate) config: TenantConfig,
    pub(crate) logs_dir: PathBuf,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) policy: Arc<dyn PolicyLookup>,
    pub(crate) transport: RwLock<Option<Arc<dyn ChatTransport>>>,
    pub(crate) connected: AtomicBool,
    state: Mutex<SessionState>,
    on_logout: LogoutCallback,
    logout_fired: AtomicBool,
}

impl SessionSupervisor {
    pub fn new(
        config: TenantConfig,
        logs_dir: PathBuf,
        publisher: Arc<dyn EventPublisher>,
        policy: Arc<dyn PolicyLookup>,
        on_logout: LogoutCallback,
    ) -> Self {
        Self {
            config,
            logs_dir,
            publisher,
            policy,
            transport: RwLock::new(None),
            connected: AtomicBool::new(false),
            state: Mutex::new(SessionState::Created),
            on_logout,
            logout_fired: AtomicBool::new(false),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.config.recruiter_id
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Bare identifier of the device backing the live session; empty when no
    /// transport is attached yet.
    pub fn store_id(&self) -> String {
        self.transport
            .read()
            .unwrap()
            .as_ref()
            .map(|t| to_bare(&t.device_id()))
            .unwrap_or_default()
    }

    /// Attach a transport session and drive authentication in the
    /// background. Resumes from a stored device whose bare id matches this
    /// tenant, otherwise registers a new device. Idempotent when already
    /// connected.
    pub async fn connect(
        self: Arc<Self>,
        factory: &Arc<dyn TransportFactory>,
        devices: &[DeviceIdentity],
    ) -> GatewayResult<()> {
        if self.is_connected() {
            info!(recruiter = %self.config.recruiter_id, "Client already connected");
            return Ok(());
        }
        self.set_state(SessionState::Connecting);

        let device = devices
            .iter()
            .find(|d| to_bare(&d.id) == self.config.recruiter_id);
        match device {
            Some(_) => {
                info!(recruiter = %self.config.recruiter_id, "Found existing device")
            }
            None => {
                info!(recruiter = %self.config.recruiter_id, "No existing device found, creating new one")
            }
        }

        let transport = factory
            .open_session(&self.config.recruiter_id, device, &self.config.host_client_name)
            .await?;
        *self.transport.write().unwrap() = Some(transport.clone());

        let Some(mut events) = transport.events() else {
            error!(recruiter = %self.config.recruiter_id, "Transport session has no event stream");
            return Err(GatewayError::Transport(TransportError::Session(
                "event stream unavailable".into(),
            )));
        };
        let supervisor = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                supervisor.handle_transport_event(event).await;
            }
        });

        // Mark live before the authentication task starts so a pairing
        // timeout observed by that task is not overwritten here.
        self.connected.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Live);

        let supervisor = Arc::clone(&self);
        let auth_transport = transport.clone();
        tokio::spawn(async move {
            supervisor.run_authentication(auth_transport).await;
        });

        info!(recruiter = %self.config.recruiter_id, "Client connected successfully");
        Ok(())
    }

    /// Authentication task: opens the connection and, when the transport
    /// requires pairing, walks the code/success/timeout protocol.
    async fn run_authentication(self: Arc<Self>, transport: Arc<dyn ChatTransport>) {
        info!(recruiter = %self.config.recruiter_id, "Starting authentication process");

        // Take the pairing channel before connecting so no event is missed.
        let pairing = transport.pairing_events();

        if let Err(e) = transport.connect().await {
            error!(
                recruiter = %self.config.recruiter_id,
                error = %e,
                "Failed to connect transport client"
            );
            self.terminate();
            return;
        }

        let Some(mut pairing) = pairing else {
            debug!(recruiter = %self.config.recruiter_id, "Session resumed, no pairing required");
            return;
        };

        match pairing.recv().await {
            Some(PairingEvent::Code(code)) => {
                self.pair_with_code(&transport, &mut pairing, &code).await;
            }
            Some(PairingEvent::Success) => {
                info!(recruiter = %self.config.recruiter_id, "Session authenticated");
            }
            Some(PairingEvent::Timeout) | None => {
                error!(recruiter = %self.config.recruiter_id, "Authentication timed out");
                self.terminate();
            }
        }
    }

    async fn pair_with_code(
        &self,
        transport: &Arc<dyn ChatTransport>,
        pairing: &mut tokio::sync::mpsc::UnboundedReceiver<PairingEvent>,
        code: &str,
    ) {
        let phone = self.config.recruiter_id.clone();
        let mut client_label = DEFAULT_CLIENT_LABEL.to_string();

        if phone.len() < PHONE_MIN_LEN || phone.len() > PHONE_MAX_LEN {
            error!(phone = %phone, "Invalid phone number format");
        }

        let allowed = &self.config.host_client_type;
        if client_label.eq_ignore_ascii_case(allowed) {
            client_label = allowed.clone();
        } else {
            error!(
                client = %client_label,
                allowed_clients = %allowed,
                "Invalid client name"
            );
        }

        self.write_qr_code(code, "Initial QR Code");

        match transport.pair_phone(&phone, &client_label).await {
            Ok(login_code) => {
                info!(login_code = %login_code, "Phone pairing successful");
                while let Some(evt) = pairing.recv().await {
                    match evt {
                        PairingEvent::Success => {
                            info!(recruiter = %phone, "Login success via phone pairing");
                            break;
                        }
                        PairingEvent::Timeout => {
                            error!(recruiter = %phone, "Phone pairing timeout");
                            self.terminate();
                            break;
                        }
                        PairingEvent::Code(_) => {}
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Phone pairing failed, falling back to QR");
                while let Some(evt) = pairing.recv().await {
                    match evt {
                        PairingEvent::Code(retry) => {
                            self.write_qr_code(&retry, "QR Code Retry");
                        }
                        PairingEvent::Success => {
                            info!(recruiter = %phone, "Login successful via QR");
                            break;
                        }
                        PairingEvent::Timeout => {
                            error!(recruiter = %phone, "QR login timeout");
                            self.terminate();
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Validate and run an operator-driven phone pairing against the live
    /// session.
    pub async fn pair_phone(&self, phone: &str, client_label: &str) -> GatewayResult<String> {
        let transport = self.live_transport()?;

        if phone.len() < PHONE_MIN_LEN || phone.len() > PHONE_MAX_LEN {
            return Err(GatewayError::Transport(TransportError::Pairing(
                "invalid phone number format".into(),
            )));
        }
        if client_label != self.config.host_client_type {
            return Err(GatewayError::Transport(TransportError::Pairing(format!(
                "invalid client name; allowed: {}",
                self.config.host_client_type
            ))));
        }

        info!(phone = %phone, client = %client_label, "Pairing phone number");
        let login_code = transport.pair_phone(phone, client_label).await?;
        info!(login_code = %login_code, "Phone pairing successful");
        Ok(login_code)
    }

    /// Append the pairing code to the tenant's QR log file at
    /// `<logs_dir>/qr/qr-code-<tenant>.log`.
    fn write_qr_code(&self, code: &str, description: &str) {
        let qr_dir = self.logs_dir.join("qr");
        if let Err(e) = std::fs::create_dir_all(&qr_dir) {
            error!(error = %e, "Failed to create QR logs directory");
            return;
        }

        let qr_path = qr_dir.join(format!("qr-code-{}.log", self.config.recruiter_id));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&qr_path);
        let mut file = match file {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "Failed to open QR log file");
                return;
            }
        };

        let entry = format!(
            "\n=== {} - {} ===\n{}\n",
            description, self.config.recruiter_id, code
        );
        if let Err(e) = file.write_all(entry.as_bytes()) {
            error!(error = %e, "Failed to write QR log file");
            return;
        }

        info!(
            description = %description,
            qr_file = %qr_path.display(),
            "QR code generated"
        );
    }

    /// Operator-driven disconnect: drop the network connection but keep the
    /// supervisor registered. No-op when already offline.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let transport = self.transport.read().unwrap().clone();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        info!(recruiter = %self.config.recruiter_id, "Client disconnected");
    }

    /// Transport-reported logout: invalidate the device on the network side,
    /// mark the session terminated and notify the fleet exactly once.
    pub async fn handle_logout(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let transport = self.transport.read().unwrap().clone();
            if let Some(transport) = transport {
                if let Err(e) = transport.logout().await {
                    error!(
                        recruiter = %self.config.recruiter_id,
                        error = %e,
                        "Transport logout failed"
                    );
                }
            }
            info!(recruiter = %self.config.recruiter_id, "Client logged out");
        }
        self.set_state(SessionState::Terminated);

        if !self.logout_fired.swap(true, Ordering::SeqCst) {
            (self.on_logout)(&self.config.recruiter_id);
        }
    }

    fn terminate(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Terminated);
    }

    pub(crate) fn live_transport(&self) -> GatewayResult<Arc<dyn ChatTransport>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::NotConnected);
        }
        self.transport
            .read()
            .unwrap()
            .clone()
            .ok_or(GatewayError::NotConnected)
    }

    fn parse_chat(&self, chat_id: &str) -> GatewayResult<ChatAddress> {
        ChatAddress::parse(chat_id).map_err(|e| {
            error!(
                recruiter = %self.config.recruiter_id,
                chat = %chat_id,
                error = %e,
                "Error parsing chat address"
            );
            GatewayError::Transport(e)
        })
    }

    pub async fn send_text(&self, chat_id: &str, text: &str) -> GatewayResult<()> {
        let transport = self.live_transport()?;
        let chat = self.parse_chat(chat_id)?;
        transport.send_text(&chat, text).await?;
        info!(chat = %chat_id, recruiter = %self.config.recruiter_id, "Text message sent successfully");
        Ok(())
    }

    pub async fn send_image(&self, chat_id: &str, payload: &ImagePayload) -> GatewayResult<()> {
        let transport = self.live_transport()?;
        let chat = self.parse_chat(chat_id)?;
        transport.send_image(&chat, payload).await?;
        info!(chat = %chat_id, recruiter = %self.config.recruiter_id, "Image message sent successfully");
        Ok(())
    }

    pub async fn send_audio(&self, chat_id: &str, payload: &AudioPayload) -> GatewayResult<()> {
        let transport = self.live_transport()?;
        let chat = self.parse_chat(chat_id)?;
        transport.send_audio(&chat, payload).await?;
        info!(chat = %chat_id, recruiter = %self.config.recruiter_id, "Audio message sent successfully");
        Ok(())
    }

    pub async fn send_document(
        &self,
        chat_id: &str,
        payload: &DocumentPayload,
    ) -> GatewayResult<()> {
        let transport = self.live_transport()?;
        let chat = self.parse_chat(chat_id)?;
        transport.send_document(&chat, payload).await?;
        info!(chat = %chat_id, recruiter = %self.config.recruiter_id, "Document message sent successfully");
        Ok(())
    }

    pub async fn send_typing(&self, chat_id: &str) -> GatewayResult<()> {
        let transport = self.live_transport()?;
        let chat = self.parse_chat(chat_id)?;
        transport.send_typing(&chat).await?;
        info!(chat = %chat_id, recruiter = %self.config.recruiter_id, "Typing indicator sent successfully");
        Ok(())
    }
}
