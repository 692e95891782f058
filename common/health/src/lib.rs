use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tokio::runtime;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Liveness tracking for the long-running loops of the worker.
///
/// Every consumer loop and the Kafka producer register a component and must
/// keep reporting before their deadline. The process is live only when every
/// registered component is live; a registry with no component is not.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (code, format!("{self:?}")).into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, has not reported yet
    Starting,
    /// Reported healthy, must report again before this instant
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// The HealthyUntil deadline went by without a new report
    Stalled,
}

impl ComponentStatus {
    fn at(&self, now: OffsetDateTime) -> ComponentStatus {
        match self {
            ComponentStatus::HealthyUntil(until) if *until <= now => ComponentStatus::Stalled,
            other => other.clone(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.at(OffsetDateTime::now_utc()), ComponentStatus::HealthyUntil(_))
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Must be called more often than the deadline given at registration.
    pub async fn report_healthy(&self) {
        self.report_status(self.healthy_until()).await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!(component = %self.component, "failed to report health status: {}", err)
        }
    }

    /// For librdkafka callbacks, which run outside of the async context.
    pub fn report_healthy_blocking(&self) {
        let status = self.healthy_until();
        if let Ok(handle) = runtime::Handle::try_current() {
            let this = self.clone();
            handle.spawn(async move { this.report_status(status).await });
            return;
        }
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.blocking_send(message) {
            warn!(component = %self.component, "failed to report health status: {}", err)
        }
    }

    fn healthy_until(&self) -> ComponentStatus {
        ComponentStatus::HealthyUntil(OffsetDateTime::now_utc() + self.deadline)
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime.
    pub fn new(name: &str) -> Self {
        let (sender, mut rx) = mpsc::channel::<HealthMessage>(16);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> = Default::default();

        let writer = components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match writer.write() {
                    Ok(mut map) => _ = map.insert(message.component, message.status),
                    // The probe will fail and the process restart
                    Err(_) => warn!("poisoned HealthRegistry lock"),
                }
            }
        });

        Self {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    pub async fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Can be used directly as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let components: HashMap<String, ComponentStatus> = match self.components.read() {
            Ok(map) => map
                .iter()
                .map(|(name, status)| (name.clone(), status.at(now)))
                .collect(),
            Err(_) => {
                warn!("poisoned HealthRegistry lock");
                return HealthStatus::default();
            }
        };

        let healthy = !components.is_empty()
            && components
                .values()
                .all(|status| matches!(status, ComponentStatus::HealthyUntil(_)));

        if healthy {
            debug!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, components);
        }
        HealthStatus {
            healthy,
            components,
        }
    }
}
