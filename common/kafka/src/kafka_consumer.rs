use std::sync::{Arc, Weak};

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::{ConsumerConfig, KafkaConfig};

/// A consumer subscribed to exactly one topic. Offsets are never stored
/// automatically: callers store the `Offset` of a message once they are done
/// with it, and librdkafka commits the stored offsets in the background.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Received empty payload")]
    Empty,
    #[error("failed to store offset of a poison pill: {0}")]
    Offset(#[from] OffsetErr),
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        topic: &str,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        common_config.apply(&mut client_config);
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set("enable.auto.offset.store", "false");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;
        info!(
            topic,
            group_id = %consumer_config.kafka_consumer_group,
            "kafka consumer subscribed"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: topic.to_owned(),
            }),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Wait for the next message and decode its JSON payload.
    ///
    /// Payloads that are empty or cannot be decoded are poison pills: their
    /// offset is stored right away and an error is returned, so they are
    /// never redelivered.
    pub async fn json_recv<T>(&self) -> Result<(T, Offset), RecvErr>
    where
        T: DeserializeOwned,
    {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        match decode_payload(message.payload()) {
            Ok(payload) => Ok((payload, offset)),
            Err(err) => {
                offset.store()?;
                Err(err)
            }
        }
    }
}

fn decode_payload<T: DeserializeOwned>(payload: Option<&[u8]>) -> Result<T, RecvErr> {
    match payload {
        None | Some([]) => Err(RecvErr::Empty),
        Some(bytes) => Ok(serde_json::from_slice(bytes)?),
    }
}

/// Position of a received message, to be stored once it has been handled.
/// Dropping it without storing leaves the message to be redelivered.
pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}
