use common_kafka::kafka_consumer::{OffsetErr, RecvErr};
use common_metrics::BuildError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::lookup::LookupError;
use crate::pipeline::PipelineError;
use crate::store::StoreError;

/// Errors that stop the worker. Anything recoverable is handled inside a
/// consumer loop and never surfaces here.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("invalid lookup url: {0}")]
    LookupUrl(#[from] url::ParseError),
    #[error("failed to build lookup client: {0}")]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to receive message: {0}")]
    Recv(#[from] RecvErr),
    #[error("failed to store offset: {0}")]
    Offset(#[from] OffsetErr),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
    #[error("health and metrics server stopped: {0}")]
    Serve(#[source] std::io::Error),
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}
