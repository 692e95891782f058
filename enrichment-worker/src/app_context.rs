use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::create_kafka_producer;
use health::{HealthHandle, HealthRegistry};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::consumer::{ConsumerLoop, Destination};
use crate::error::WorkerError;
use crate::lookup::HttpLookupClient;
use crate::pipeline::Pipeline;
use crate::sink::KafkaErrorSink;
use crate::store::PgEnrichmentStore;

pub struct AppContext {
    pub health_registry: HealthRegistry,
    pub main_liveness: HealthHandle,
    pub error_liveness: HealthHandle,
    pub main_consumer: SingleTopicConsumer,
    pub error_consumer: SingleTopicConsumer,
    pub pipeline: Arc<Pipeline>,
    pub config: Config,
}

impl AppContext {
    pub async fn new(config: Config) -> Result<Self, WorkerError> {
        let health_registry = HealthRegistry::new("liveness");
        // A loop reports at least once per poll timeout while idle
        let loop_deadline = config.poll_timeout.0 + Duration::from_secs(60);
        let main_liveness = health_registry
            .register("main_consumer", loop_deadline)
            .await;
        let error_liveness = health_registry
            .register("error_consumer", loop_deadline)
            .await;
        let producer_liveness = health_registry
            .register("kafka_producer", Duration::from_secs(30))
            .await;

        let main_consumer =
            SingleTopicConsumer::new(&config.kafka, &config.consumer, &config.main_topic)?;
        let error_consumer =
            SingleTopicConsumer::new(&config.kafka, &config.consumer, &config.error_topic)?;

        let producer = create_kafka_producer(&config.kafka, producer_liveness).await?;
        let sink = KafkaErrorSink::new(producer);

        let store = PgEnrichmentStore::connect(&config.database_url, &config.pool()).await?;
        info!("connected to the database");

        let lookup = HttpLookupClient::new(
            config.lookup.lookup_url.parse()?,
            config.lookup.lookup_token.as_deref(),
            config.lookup.lookup_timeout.0,
        )?;

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(lookup),
            Arc::new(store),
            Arc::new(sink),
            &config.error_topic,
        ));

        Ok(Self {
            health_registry,
            main_liveness,
            error_liveness,
            main_consumer,
            error_consumer,
            pipeline,
            config,
        })
    }

    /// Run both consumer loops until `shutdown` is cancelled. A fatal error in
    /// either loop stops the other and is returned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let main_loop = ConsumerLoop::new(
            self.main_consumer.clone(),
            Destination::Main,
            self.pipeline.clone(),
            self.main_liveness.clone(),
            self.config.poll_timeout.0,
        );
        let error_loop = ConsumerLoop::new(
            self.error_consumer.clone(),
            Destination::Error,
            self.pipeline.clone(),
            self.error_liveness.clone(),
            self.config.poll_timeout.0,
        );

        let result = tokio::try_join!(
            main_loop.run(shutdown.clone()),
            error_loop.run(shutdown.clone())
        );
        shutdown.cancel();

        result.map(|_| ())
    }
}
