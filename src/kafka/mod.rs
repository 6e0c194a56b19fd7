//! Event bus adapter: named producers for the gateway's four outbound
//! streams and the single consumer for the dispatch stream.

pub mod consumer;
pub mod producer;

pub use consumer::OutputConsumer;
pub use producer::KafkaBus;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::event::{GatewayEvent, StreamTopic};

/// Publishing seam between the pipelines and the bus. The Kafka adapter is
/// the production implementation; tests substitute an in-memory recorder.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Serialize `event` to JSON and write one record to `topic` with the
    /// given partitioning key.
    async fn publish(
        &self,
        event: &GatewayEvent,
        topic: StreamTopic,
        key: &str,
    ) -> GatewayResult<()>;

    /// Write pre-serialized bytes verbatim (the dispatcher's audit copy of
    /// outbound records).
    async fn publish_bytes(&self, payload: &[u8], topic: StreamTopic, key: &str)
        -> GatewayResult<()>;
}
