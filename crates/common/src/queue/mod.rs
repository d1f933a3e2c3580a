//! SQS queue integration for the ingestion worker
//!
//! Provides:
//! - SQS client wrapper (send, delayed send, receive, delete)
//! - Typed parsing of the two message shapes on the events queue:
//!   object-store event notifications and self-posted deferred retries
//!
//! The deferred-retry path uses `send_delayed` with an exponential delay;
//! the authority for "is a job running" lives in the engine, so there is
//! no local lock to take.

use crate::errors::{AppError, Result};
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            visibility_timeout: 60,
            wait_time_seconds: 20,
            max_messages: 10,
        }
    }
}

/// SQS queue client wrapper
pub struct Queue {
    client: SqsClient,
    config: QueueConfig,
}

impl Queue {
    /// Create a new queue client
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, config })
    }

    /// Create with existing AWS client
    pub fn with_client(client: SqsClient, config: QueueConfig) -> Self {
        Self { client, config }
    }

    /// Send a message to the queue
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        let result = self
            .client
            .send_message()
            .queue_url(&self.config.url)
            .message_body(&body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }

    /// Send a message with delay (SQS caps the delay at 900 seconds)
    pub async fn send_delayed<T: Serialize>(&self, message: &T, delay_seconds: i32) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        let result = self
            .client
            .send_message()
            .queue_url(&self.config.url)
            .message_body(&body)
            .delay_seconds(delay_seconds.min(900))
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send delayed message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, delay_seconds, "Delayed message sent to queue");

        Ok(message_id)
    }

    /// Receive messages from the queue
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Parse message body as JSON
    pub fn parse_message<T: DeserializeOwned>(message: &Message) -> Result<T> {
        let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;

        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }
}

/// Object-store event notification, as delivered by S3
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEventNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<ObjectEventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEventRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    pub s3: ObjectEventEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEventEntity {
    pub bucket: ObjectEventBucket,
    pub object: ObjectEventObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEventBucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEventObject {
    pub key: String,
    #[serde(default)]
    pub size: Option<i64>,
}

impl ObjectEventRecord {
    /// S3 delivers creation and removal events on the same topic; only
    /// creations start ingestion.
    pub fn is_creation(&self) -> bool {
        self.event_name.starts_with("ObjectCreated")
    }
}

/// Self-posted deferred retry for a job start that hit a concurrent-job
/// conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobRetry {
    /// Attempts consumed so far
    pub attempt: u32,
}

/// The two message shapes the worker consumes
///
/// Untagged: `StartJobRetry` is tried first (it requires the `attempt`
/// field, which event notifications never carry).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Retry(StartJobRetry),
    Event(ObjectEventNotification),
}

/// Exponential delay for deferred job-start retries, capped at the SQS
/// maximum of 900 seconds.
pub fn retry_delay_secs(base_delay_secs: u64, attempt: u32) -> u64 {
    base_delay_secs
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(900)
}
