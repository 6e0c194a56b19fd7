use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{error, info};

use super::EventPublisher;
use crate::config::KafkaConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::event::{GatewayEvent, StreamTopic};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// One named producer bound to a concrete topic.
struct TopicProducer {
    producer: FutureProducer,
    topic: String,
}

impl TopicProducer {
    fn new(brokers: &str, topic: &str) -> GatewayResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("request.timeout.ms", "30000")
            .set("delivery.timeout.ms", "120000")
            .create()?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }

    async fn send(&self, key: &str, payload: &[u8]) -> GatewayResult<(i32, i64)> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);
        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok(delivery) => Ok(delivery),
            Err((kafka_err, _)) => Err(GatewayError::from(kafka_err)),
        }
    }

    fn flush(&self) -> GatewayResult<()> {
        self.producer.flush(Timeout::After(FLUSH_TIMEOUT))?;
        Ok(())
    }
}

/// The named producer set. rdkafka producers are safe for concurrent use, so
/// writes to different topics do not serialize against each other.
pub struct KafkaBus {
    producers: HashMap<StreamTopic, TopicProducer>,
}

impl KafkaBus {
    /// Create producers for all four outbound streams.
    pub fn new(config: &KafkaConfig) -> GatewayResult<Self> {
        let brokers = config.brokers.join(",");
        let mut producers = HashMap::new();
        for (stream, topic_config) in [
            (StreamTopic::Raw, &config.raw),
            (StreamTopic::Ingest, &config.ingest),
            (StreamTopic::Failed, &config.failed),
            (StreamTopic::Admin, &config.admin),
        ] {
            producers.insert(stream, TopicProducer::new(&brokers, &topic_config.topic)?);
            info!(stream = %stream, topic = %topic_config.topic, "Kafka producer initialized");
        }
        Ok(Self { producers })
    }

    async fn write(&self, topic: StreamTopic, key: &str, payload: &[u8]) -> GatewayResult<()> {
        let Some(producer) = self.producers.get(&topic) else {
            // A topic without a writer drops the record; the pipeline keeps
            // going.
            error!(topic = %topic, "Kafka producer for topic not initialized");
            return Ok(());
        };
        let (partition, offset) = producer.send(key, payload).await?;
        info!(
            topic = %topic,
            partition = partition,
            offset = offset,
            "Message sent to [{}] topic",
            topic
        );
        Ok(())
    }

    /// Flush every producer. The first error is reported, but all producers
    /// are flushed regardless.
    pub fn close(&self) -> GatewayResult<()> {
        let mut first_err: Option<GatewayError> = None;
        for (stream, producer) in &self.producers {
            if let Err(e) = producer.flush() {
                error!(topic = %stream, error = %e, "Error closing Kafka producer");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaBus {
    async fn publish(
        &self,
        event: &GatewayEvent,
        topic: StreamTopic,
        key: &str,
    ) -> GatewayResult<()> {
        let payload = serde_json::to_vec(event)?;
        self.write(topic, key, &payload).await
    }

    async fn publish_bytes(
        &self,
        payload: &[u8],
        topic: StreamTopic,
        key: &str,
    ) -> GatewayResult<()> {
        self.write(topic, key, payload).await
    }
}
