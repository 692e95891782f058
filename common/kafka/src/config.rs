use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // SASL/PLAIN is enabled when both are set
    pub kafka_sasl_username: Option<String>,
    pub kafka_sasl_password: Option<String>,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

impl KafkaConfig {
    /// Apply the connection and security settings shared by consumers and producers.
    pub fn apply(&self, client_config: &mut ClientConfig) {
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000");

        let sasl = match (&self.kafka_sasl_username, &self.kafka_sasl_password) {
            (Some(username), Some(password)) => Some((username, password)),
            _ => None,
        };

        let protocol = match (self.kafka_tls, sasl.is_some()) {
            (true, true) => "sasl_ssl",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (false, false) => "plaintext",
        };
        client_config.set("security.protocol", protocol);

        if self.kafka_tls {
            client_config.set("enable.ssl.certificate.verification", "false");
        }

        if let Some((username, password)) = sasl {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    #[envconfig(default = "enrichment-worker")]
    pub kafka_consumer_group: String,

    // We default to "earliest" so a fresh group does not skip records already in the topic
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Offsets are stored by hand once a message is handled, and the stored
    // offsets are committed on this interval
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,
}
