//! Multi-tenant messaging gateway between a session-oriented chat transport
//! and topic-partitioned Kafka streams.
//!
//! One process hosts many recruiter sessions. Inbound chat events run
//! through a per-tenant policy pipeline and land on the `raw`/`ingest`/
//! `admin`/`failed` streams; outbound dispatch records are consumed from the
//! `output` stream and routed to the owning tenant's session.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod fleet;
pub mod identity;
pub mod inbound;
pub mod kafka;
pub mod logging;
pub mod policy;
pub mod supervisor;
pub mod transport;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use event::{GatewayEvent, StreamTopic};
pub use fleet::{FleetManager, Registry};
pub use supervisor::{SessionState, SessionSupervisor};
