use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::{send_json_to_kafka, KafkaProduceError};
use common_kafka::test::create_mock_kafka;
use enrichment_worker::consumer::{ConsumerLoop, Destination};
use enrichment_worker::error::WorkerError;
use enrichment_worker::lookup::{LookupClient, LookupError};
use enrichment_worker::message::Message;
use enrichment_worker::pipeline::{Pipeline, PipelineError};
use enrichment_worker::sink::{ErrorSink, SinkError};
use enrichment_worker::store::{EnrichmentStore, StoreError};
use health::{HealthHandle, HealthRegistry};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct StaticLookup {
    calls: AtomicUsize,
}

#[async_trait]
impl LookupClient for StaticLookup {
    async fn resolve(&self, first_name: &str) -> Result<String, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("INN-{first_name}"))
    }
}

#[derive(Default)]
struct RecordingStore {
    applied: Mutex<Vec<(i64, String)>>,
    unavailable: bool,
}

#[async_trait]
impl EnrichmentStore for RecordingStore {
    async fn apply(&self, id: i64, value: &str) -> Result<u64, StoreError> {
        if self.unavailable {
            return Err(StoreError::Update {
                id,
                error: sqlx::Error::PoolTimedOut,
            });
        }
        self.applied.lock().unwrap().push((id, value.to_string()));
        Ok(1)
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<Message>>,
    unavailable: bool,
}

#[async_trait]
impl ErrorSink for RecordingSink {
    async fn publish(&self, topic: &str, message: &Message) -> Result<(), SinkError> {
        if self.unavailable {
            return Err(SinkError {
                topic: topic.to_string(),
                source: KafkaProduceError::KafkaProduceCanceled,
            });
        }
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn consumer(bootstrap_servers: String, topic: &str) -> SingleTopicConsumer {
    let kafka = KafkaConfig {
        kafka_hosts: bootstrap_servers,
        kafka_tls: false,
        kafka_sasl_username: None,
        kafka_sasl_password: None,
        kafka_producer_linger_ms: 0,
        kafka_producer_queue_mib: 50,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "none".to_string(),
    };
    let consumer = ConsumerConfig {
        kafka_consumer_group: "consumer_loop_test".to_string(),
        kafka_consumer_offset_reset: "earliest".to_string(),
        kafka_consumer_auto_commit_interval_ms: 1000,
    };
    SingleTopicConsumer::new(&kafka, &consumer, topic).expect("failed to create consumer")
}

async fn liveness() -> HealthHandle {
    HealthRegistry::new("liveness")
        .register("main_consumer", Duration::from_secs(30))
        .await
}

/// The offset committed for the test group on partition 0 of `topic`.
fn committed_offset(checker: &BaseConsumer, topic: &str) -> Option<i64> {
    let mut partitions = TopicPartitionList::new();
    partitions.add_partition(topic, 0);
    let committed = checker
        .committed_offsets(partitions, Duration::from_secs(5))
        .ok()?;
    match committed.find_partition(topic, 0)?.offset() {
        Offset::Offset(offset) => Some(offset),
        _ => None,
    }
}

/// Poll `done` until it holds or the deadline passes.
async fn wait_for(done: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("timed out waiting for the consumer loop");
}

#[tokio::test]
async fn stops_when_cancelled() {
    let (cluster, _producer) = create_mock_kafka(&["main_topic"]).await;
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(StaticLookup::default()),
        Arc::new(RecordingStore::default()),
        Arc::new(RecordingSink::default()),
        "error_topic",
    ));
    let consumer_loop = ConsumerLoop::new(
        consumer(cluster.bootstrap_servers(), "main_topic"),
        Destination::Main,
        pipeline,
        liveness().await,
        Duration::from_millis(100),
    );

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), consumer_loop.run(shutdown))
        .await
        .expect("cancelled loop should stop");
    assert!(result.is_ok());
}

#[tokio::test]
async fn handles_messages_from_the_main_topic() {
    let (cluster, producer) = create_mock_kafka(&["main_topic"]).await;
    let store = Arc::new(RecordingStore::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(StaticLookup::default()),
        store.clone(),
        sink.clone(),
        "error_topic",
    ));

    send_json_to_kafka(&producer, "main_topic", None, "not a message")
        .await
        .unwrap();
    send_json_to_kafka(&producer, "main_topic", Some("0"), &json!({"id": 0}))
        .await
        .unwrap();
    let wrongly_typed = json!({"id": "42", "first_name": "Alice", "source": "crm"});
    send_json_to_kafka(&producer, "main_topic", None, &wrongly_typed)
        .await
        .unwrap();
    send_json_to_kafka(
        &producer,
        "main_topic",
        Some("42"),
        &json!({"id": 42, "first_name": "Alice"}),
    )
    .await
    .unwrap();

    let consumer_loop = ConsumerLoop::new(
        consumer(cluster.bootstrap_servers(), "main_topic"),
        Destination::Main,
        pipeline,
        liveness().await,
        Duration::from_millis(100),
    );
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(consumer_loop.run(shutdown.clone()));

    wait_for(|| !store.applied.lock().unwrap().is_empty()).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(
        *store.applied.lock().unwrap(),
        vec![(42, "INN-Alice".to_string())]
    );
    let published: Vec<serde_json::Value> = sink
        .published
        .lock()
        .unwrap()
        .iter()
        .map(|message| serde_json::to_value(message).unwrap())
        .collect();
    assert_eq!(published, vec![json!({"id": 0}), wrongly_typed]);
}

#[tokio::test]
async fn persistence_failure_stops_the_loop() {
    let (cluster, producer) = create_mock_kafka(&["main_topic"]).await;
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(StaticLookup::default()),
        Arc::new(RecordingStore {
            unavailable: true,
            ..Default::default()
        }),
        Arc::new(RecordingSink::default()),
        "error_topic",
    ));

    send_json_to_kafka(
        &producer,
        "main_topic",
        Some("42"),
        &json!({"id": 42, "first_name": "Alice"}),
    )
    .await
    .unwrap();

    let consumer_loop = ConsumerLoop::new(
        consumer(cluster.bootstrap_servers(), "main_topic"),
        Destination::Main,
        pipeline,
        liveness().await,
        Duration::from_millis(100),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(30),
        consumer_loop.run(CancellationToken::new()),
    )
    .await
    .expect("loop should stop on its own");

    assert!(matches!(
        result,
        Err(WorkerError::Pipeline(PipelineError::Persistence(
            StoreError::Update { id: 42, .. }
        )))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_topic_messages_are_observed_once() {
    let (cluster, producer) = create_mock_kafka(&["error_topic"]).await;
    let lookup = Arc::new(StaticLookup::default());
    let store = Arc::new(RecordingStore::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = Arc::new(Pipeline::new(
        lookup.clone(),
        store.clone(),
        sink.clone(),
        "error_topic",
    ));

    send_json_to_kafka(&producer, "error_topic", Some("0"), &json!({"id": 0}))
        .await
        .unwrap();

    let consumer_loop = ConsumerLoop::new(
        consumer(cluster.bootstrap_servers(), "error_topic"),
        Destination::Error,
        pipeline,
        liveness().await,
        Duration::from_millis(100),
    );
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(consumer_loop.run(shutdown.clone()));

    // Group offsets are read without joining the group
    let checker: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", cluster.bootstrap_servers())
        .set("group.id", "consumer_loop_test")
        .create()
        .expect("failed to create consumer");
    let checker = Arc::new(checker);

    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let checker = checker.clone();
            let committed =
                tokio::task::spawn_blocking(move || committed_offset(&checker, "error_topic"))
                    .await
                    .unwrap();
            if committed == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await
    .expect("offset of the observed message was never committed");

    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    assert!(store.applied.lock().unwrap().is_empty());
    assert!(sink.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn quarantine_failure_stops_the_loop() {
    let (cluster, producer) = create_mock_kafka(&["main_topic"]).await;
    let store = Arc::new(RecordingStore::default());
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(StaticLookup::default()),
        store.clone(),
        Arc::new(RecordingSink {
            unavailable: true,
            ..Default::default()
        }),
        "error_topic",
    ));

    send_json_to_kafka(
        &producer,
        "main_topic",
        None,
        &json!({"id": "42", "first_name": "Alice"}),
    )
    .await
    .unwrap();

    let consumer_loop = ConsumerLoop::new(
        consumer(cluster.bootstrap_servers(), "main_topic"),
        Destination::Main,
        pipeline,
        liveness().await,
        Duration::from_millis(100),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(30),
        consumer_loop.run(CancellationToken::new()),
    )
    .await
    .expect("loop should stop on its own");

    assert!(matches!(
        result,
        Err(WorkerError::Pipeline(PipelineError::Sink { id: None, .. }))
    ));
    assert!(store.applied.lock().unwrap().is_empty());
}
