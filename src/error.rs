use thiserror::Error;

use crate::transport::TransportError;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Application error type covering every failure origin in the gateway.
///
/// Startup errors (config, Kafka init, database) are fatal; everything else
/// is logged at the call site and the affected record is dropped or skipped
/// according to the component's policy.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Configuration =====
    #[error("configuration error: {0}")]
    Config(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ===== Serialization =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Storage =====
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Message bus =====
    #[error("Kafka error: {0}")]
    Kafka(String),

    // ===== Chat transport =====
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A send was attempted against a session that is not live.
    #[error("client not connected")]
    NotConnected,
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::Config(msg.into())
    }

    pub fn kafka(msg: impl Into<String>) -> Self {
        GatewayError::Kafka(msg.into())
    }
}

impl From<rdkafka::error::KafkaError> for GatewayError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        GatewayError::Kafka(err.to_string())
    }
}
