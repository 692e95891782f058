use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::{RecvErr, SingleTopicConsumer};
use health::HealthHandle;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::message::Message;
use crate::metric_consts::{DECODE_ERRORS, MESSAGES_HANDLED, MESSAGES_RECEIVED};
use crate::pipeline::{Outcome, Pipeline, PipelineError};

/// Which handler a consumer loop dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Main,
    Error,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Main => "main",
            Destination::Error => "error",
        }
    }
}

/// Receives messages from one topic and handles them one at a time.
///
/// A message's offset is stored only after its handler returned, so a
/// message interrupted by shutdown or by a fatal error is redelivered.
pub struct ConsumerLoop {
    consumer: SingleTopicConsumer,
    destination: Destination,
    pipeline: Arc<Pipeline>,
    liveness: HealthHandle,
    poll_timeout: Duration,
}

impl ConsumerLoop {
    pub fn new(
        consumer: SingleTopicConsumer,
        destination: Destination,
        pipeline: Arc<Pipeline>,
        liveness: HealthHandle,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            destination,
            pipeline,
            liveness,
            poll_timeout,
        }
    }

    /// Run until `shutdown` is cancelled or a fatal error occurs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let topic = self.destination.as_str();
        info!(topic = self.consumer.topic(), "consumer loop started");

        loop {
            self.liveness.report_healthy().await;

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = tokio::time::timeout(
                    self.poll_timeout,
                    self.consumer.json_recv::<Message>(),
                ) => received,
            };

            let (message, offset) = match received {
                // Nothing arrived, loop around to report liveness
                Err(_) => continue,
                Ok(Ok(received)) => received,
                Ok(Err(err @ (RecvErr::Serde(_) | RecvErr::Empty))) => {
                    warn!(
                        topic = self.consumer.topic(),
                        "skipping undecodable message: {}", err
                    );
                    counter!(DECODE_ERRORS, "topic" => topic).increment(1);
                    continue;
                }
                Ok(Err(err)) => return Err(err.into()),
            };
            counter!(MESSAGES_RECEIVED, "topic" => topic).increment(1);

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(
                        partition = offset.partition(),
                        offset = offset.offset(),
                        "shutdown while handling a message, leaving it for redelivery"
                    );
                    break;
                }
                outcome = self.handle(&message) => outcome?,
            };

            counter!(MESSAGES_HANDLED, "topic" => topic, "outcome" => outcome.label())
                .increment(1);
            debug!(
                partition = offset.partition(),
                offset = offset.offset(),
                outcome = outcome.label(),
                "message handled"
            );
            offset.store()?;
        }

        info!(topic = self.consumer.topic(), "consumer loop stopped");
        Ok(())
    }

    async fn handle(&self, message: &Message) -> Result<Outcome, PipelineError> {
        match self.destination {
            Destination::Main => self.pipeline.handle_main(message).await,
            Destination::Error => Ok(self.pipeline.handle_error(message)),
        }
    }
}
