use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::info;

use crate::config::KafkaConfig;
use crate::error::{GatewayError, GatewayResult};

/// Consumer bound to the outbound dispatch stream.
pub struct OutputConsumer {
    consumer: StreamConsumer,
}

impl OutputConsumer {
    pub fn new(config: &KafkaConfig) -> GatewayResult<Self> {
        let brokers = config.brokers.join(",");
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &config.output.group_id)
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .create()?;

        consumer
            .subscribe(&[config.output.topic.as_str()])
            .map_err(GatewayError::from)?;

        info!(
            topic = %config.output.topic,
            group_id = %config.output.group_id,
            "Kafka output consumer initialized"
        );

        Ok(Self { consumer })
    }

    /// Receive the next record's payload bytes.
    pub async fn recv(&self) -> GatewayResult<Vec<u8>> {
        let message = self.consumer.recv().await?;
        let payload = message
            .payload()
            .ok_or_else(|| GatewayError::kafka("record payload is empty"))?;
        Ok(payload.to_vec())
    }
}
