use std::future::{ready, Future};

use axum::{routing::get, Router};
use common_metrics::{serve, setup_metrics_routes};
use enrichment_worker::{app_context::AppContext, config::Config, error::WorkerError};
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().expect("valid directive")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "enrichment worker"
}

fn start_health_liveness_server(
    config: &Config,
    registry: HealthRegistry,
) -> Result<JoinHandle<Result<(), std::io::Error>>, WorkerError> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(registry.get_status())));
    let router = setup_metrics_routes(router)?;
    let bind = config.bind();

    Ok(tokio::task::spawn(async move { serve(router, &bind).await }))
}

/// Drive `work` to completion. The health server stopping first is fatal.
async fn supervise<F>(
    work: F,
    server: JoinHandle<Result<(), std::io::Error>>,
) -> Result<(), WorkerError>
where
    F: Future<Output = Result<(), WorkerError>>,
{
    tokio::select! {
        result = work => result,
        served = server => {
            let err = match served {
                Ok(Err(err)) => err,
                Ok(Ok(())) => std::io::Error::other("server exited"),
                Err(join) => join.into(),
            };
            Err(WorkerError::Serve(err))
        }
    }
}

/// Cancel `shutdown` on the first SIGTERM or SIGINT.
fn cancel_on_signal(shutdown: CancellationToken) -> Result<(), WorkerError> {
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => info!("received SIGTERM, shutting down"),
            _ = interrupt.recv() => info!("received SIGINT, shutting down"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    setup_tracing();
    info!("Starting enrichment worker...");

    let config = Config::init_from_env()?;
    info!(
        main_topic = %config.main_topic,
        error_topic = %config.error_topic,
        group_id = %config.consumer.kafka_consumer_group,
        "Configuration loaded"
    );

    let context = AppContext::new(config).await?;
    let server = start_health_liveness_server(&context.config, context.health_registry.clone())?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone())?;

    if let Err(err) = supervise(context.run(shutdown), server).await {
        error!("enrichment worker stopped: {}", err);
        return Err(err);
    }

    info!("enrichment worker shut down");
    Ok(())
}
