//! DocHarbor Ingestion Worker
//!
//! Consumes object-created events from the uploads bucket:
//! 1. Receives event (or deferred-retry) messages from SQS
//! 2. Starts engine ingestion jobs, deferring on concurrent-job conflicts
//! 3. Polls running jobs and flips document lifecycle state

use docharbor_common::{
    config::AppConfig,
    db::{DbPool, DocumentStore, Repository},
    engine::{HttpKnowledgeEngine, KnowledgeEngine},
    metrics,
    queue::{Queue, QueueConfig, StartJobRetry, WorkerMessage},
    VERSION,
};
use docharbor_ingestion::{
    poller::StatusPoller,
    trigger::{IngestionTrigger, TriggerConfig, TriggerOutcome},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .json()
        .init();

    info!("Starting DocHarbor Ingestion Worker v{}", VERSION);

    // Load configuration; missing identifiers abort startup
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(Repository::new(db));

    // Knowledge engine client
    let engine: Arc<dyn KnowledgeEngine> = Arc::new(HttpKnowledgeEngine::new(config.engine.clone())?);

    let trigger = IngestionTrigger::new(
        store.clone(),
        engine.clone(),
        TriggerConfig {
            key_prefix: config.storage.key_prefix.clone(),
            max_start_attempts: config.ingest.max_start_attempts,
            retry_base_delay_secs: config.ingest.retry_base_delay_secs,
        },
    );

    let poller = StatusPoller::new(
        store.clone(),
        engine.clone(),
        config.ingest.max_processing_secs,
    );

    // Events queue
    let Some(queue_url) = config.ingest.events_queue_url.clone() else {
        warn!("ingest.events_queue_url not set, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Ingestion worker shutting down");
        return Ok(());
    };

    info!(url = %queue_url, "Connecting to events queue...");
    let queue = Queue::new(QueueConfig {
        url: queue_url,
        ..Default::default()
    })
    .await?;

    info!("Ingestion worker ready, starting event loop...");

    let mut poll_interval =
        tokio::time::interval(std::time::Duration::from_secs(config.ingest.poll_interval_secs));

    // Circuit breaker state
    let mut consecutive_failures = 0u32;
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: std::time::Duration = std::time::Duration::from_secs(30);

    loop {
        // Circuit breaker check
        if consecutive_failures >= MAX_FAILURES {
            warn!(
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }

            _ = poll_interval.tick() => {
                match poller.poll_once().await {
                    Ok(summary) => {
                        if summary.succeeded + summary.failed > 0 {
                            info!(
                                succeeded = summary.succeeded,
                                failed = summary.failed,
                                still_running = summary.still_running,
                                "Poll pass completed"
                            );
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Poll pass failed");
                    }
                }
            }

            result = queue.receive() => {
                match result {
                    Ok(messages) => {
                        for message in messages {
                            let receipt = message.receipt_handle.clone().unwrap_or_default();

                            match process_message(&trigger, &queue, &message).await {
                                Ok(()) => {
                                    consecutive_failures = 0;
                                    if let Err(e) = queue.delete(&receipt).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    error!(
                                        error = %e,
                                        failures = consecutive_failures,
                                        "Failed to process message; leaving for redelivery"
                                    );
                                }
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("Ingestion worker shutting down");
    Ok(())
}

/// Dispatch one queue message through the trigger
async fn process_message(
    trigger: &IngestionTrigger,
    queue: &Queue,
    message: &aws_sdk_sqs::types::Message,
) -> docharbor_common::errors::Result<()> {
    let parsed: WorkerMessage = Queue::parse_message(message)?;

    match parsed {
        WorkerMessage::Event(event) => {
            for record in event.records {
                if !record.is_creation() {
                    continue;
                }

                let outcome = trigger.on_object_created(&record.s3.object.key).await?;
                handle_outcome(queue, outcome).await?;
            }
        }
        WorkerMessage::Retry(retry) => {
            let outcome = trigger.on_retry(retry.attempt).await?;
            handle_outcome(queue, outcome).await?;
        }
    }

    Ok(())
}

/// Requeue deferred starts; everything else is already settled
async fn handle_outcome(
    queue: &Queue,
    outcome: TriggerOutcome,
) -> docharbor_common::errors::Result<()> {
    if let TriggerOutcome::Deferred {
        attempt,
        delay_secs,
    } = outcome
    {
        queue
            .send_delayed(&StartJobRetry { attempt }, delay_secs as i32)
            .await?;
    }
    Ok(())
}
