use async_trait::async_trait;
use common_kafka::kafka_producer::{send_json_to_kafka, KafkaContext, KafkaProduceError};
use rdkafka::producer::FutureProducer;
use thiserror::Error;

use crate::message::Message;

#[derive(Error, Debug)]
#[error("failed to publish message to {topic}: {source}")]
pub struct SinkError {
    pub topic: String,
    #[source]
    pub source: KafkaProduceError,
}

/// Where messages that cannot be enriched are parked for later inspection.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn publish(&self, topic: &str, message: &Message) -> Result<(), SinkError>;
}

pub struct KafkaErrorSink {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaErrorSink {
    pub fn new(producer: FutureProducer<KafkaContext>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl ErrorSink for KafkaErrorSink {
    async fn publish(&self, topic: &str, message: &Message) -> Result<(), SinkError> {
        let key = message.key();
        send_json_to_kafka(&self.producer, topic, key.as_deref(), message)
            .await
            .map_err(|source| SinkError {
                topic: topic.to_owned(),
                source,
            })
    }
}
