use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::lookup::LookupClient;
use crate::message::Message;
use crate::metric_consts::{
    LOOKUP_DURATION, MESSAGES_QUARANTINED, NO_ROWS_UPDATED, STORE_DURATION,
};
use crate::sink::{ErrorSink, SinkError};
use crate::store::{EnrichmentStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineReason {
    Validation,
    Lookup,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::Validation => "validation",
            QuarantineReason::Lookup => "lookup",
        }
    }
}

/// What happened to a message the pipeline accepted. Every outcome means the
/// message is done with and its offset can be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Enriched { rows_affected: u64 },
    /// The lookup succeeded but no record matches the id.
    // TODO: product owners to decide whether these belong on the error topic,
    // the record stays unenriched and only a log line and a counter remain.
    NoRowsUpdated,
    Quarantined(QuarantineReason),
    /// Seen on the error topic.
    Observed,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Enriched { .. } => "enriched",
            Outcome::NoRowsUpdated => "no_rows_updated",
            Outcome::Quarantined(reason) => reason.as_str(),
            Outcome::Observed => "observed",
        }
    }
}

/// Failures the process cannot continue past. The message is left
/// unacknowledged and will be redelivered once the process restarts.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("message {id:?} could not be moved to the error topic: {source}")]
    Sink {
        id: Option<i64>,
        #[source]
        source: SinkError,
    },
    #[error("enrichment could not be persisted: {0}")]
    Persistence(#[from] StoreError),
}

/// Drives a single message through validation, lookup and persistence.
///
/// The pipeline holds no state of its own, one instance is shared by every
/// consumer loop. Dropping a `handle_main` future stops it at its current
/// await point without further side effects.
pub struct Pipeline {
    lookup: Arc<dyn LookupClient>,
    store: Arc<dyn EnrichmentStore>,
    sink: Arc<dyn ErrorSink>,
    error_topic: String,
}

impl Pipeline {
    pub fn new(
        lookup: Arc<dyn LookupClient>,
        store: Arc<dyn EnrichmentStore>,
        sink: Arc<dyn ErrorSink>,
        error_topic: &str,
    ) -> Self {
        Self {
            lookup,
            store,
            sink,
            error_topic: error_topic.to_owned(),
        }
    }

    /// Handle a message from the main topic.
    ///
    /// Invalid messages and failed lookups are published unchanged to the
    /// error topic and reported as `Outcome::Quarantined`. Only a failure to
    /// publish there, or to persist the value, is returned as an error.
    #[instrument(skip_all, fields(id = ?message.id()))]
    pub async fn handle_main(&self, message: &Message) -> Result<Outcome, PipelineError> {
        debug!("message processing start");

        let key = match message.validate() {
            Ok(key) => key,
            Err(err) => {
                error!("message validation failed: {}", err);
                return self.quarantine(message, QuarantineReason::Validation).await;
            }
        };

        let started = Instant::now();
        let resolved = self.lookup.resolve(key.first_name).await;
        histogram!(LOOKUP_DURATION).record(started.elapsed().as_secs_f64());

        let value = match resolved {
            Ok(value) => value,
            Err(err) => {
                error!("lookup failed: {}", err);
                return self.quarantine(message, QuarantineReason::Lookup).await;
            }
        };

        let started = Instant::now();
        let applied = self.store.apply(key.id, &value).await;
        histogram!(STORE_DURATION).record(started.elapsed().as_secs_f64());
        let rows_affected = applied?;

        let outcome = if rows_affected == 0 {
            info!("no rows updated");
            counter!(NO_ROWS_UPDATED).increment(1);
            Outcome::NoRowsUpdated
        } else {
            Outcome::Enriched { rows_affected }
        };

        debug!("message processing complete");
        Ok(outcome)
    }

    /// Handle a message from the error topic. Nothing is retried or stored.
    pub fn handle_error(&self, message: &Message) -> Outcome {
        info!(id = ?message.id(), "message from error topic: {:?}", message);
        Outcome::Observed
    }

    async fn quarantine(
        &self,
        message: &Message,
        reason: QuarantineReason,
    ) -> Result<Outcome, PipelineError> {
        self.sink
            .publish(&self.error_topic, message)
            .await
            .map_err(|source| PipelineError::Sink {
                id: message.id(),
                source,
            })?;

        counter!(MESSAGES_QUARANTINED, "reason" => reason.as_str()).increment(1);
        Ok(Outcome::Quarantined(reason))
    }
}
