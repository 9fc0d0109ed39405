use crate::config::KafkaConfig;
use crate::notification::{ObjectNotification, StorageEvent};
use crate::registry::Registry;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to the records of one notification message
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MessageOutcome {
    pub ingested: usize,
    /// Records refused for good (bad metadata, deleted object, undecodable key)
    pub rejected: usize,
    /// Records that hit a dependency fault and may succeed on redelivery
    pub retryable: usize,
    /// Records that were not object creations in the watched bucket
    pub skipped: usize,
}

impl MessageOutcome {
    /// Commit unless some record needs the message redelivered.
    ///
    /// Rejections are final: redelivering them cannot change the result and
    /// would stall the partition.
    pub fn should_commit(&self) -> bool {
        self.retryable == 0
    }
}

/// Ingest every object-created record of one S3 event payload.
///
/// An unparseable payload can never succeed and is reported as an error so the
/// caller can drop it; per-record failures are counted in the outcome instead.
pub async fn handle_payload(registry: &Registry, payload: &[u8]) -> Result<MessageOutcome> {
    let event = StorageEvent::parse(payload).context("Failed to deserialize storage notification")?;

    let mut outcome = MessageOutcome::default();

    if event.is_test_event() {
        debug!("Skipping storage test event");
        return Ok(outcome);
    }

    let mut notifications: Vec<ObjectNotification> = Vec::with_capacity(event.records.len());
    for record in &event.records {
        match record.object_notification() {
            Ok(Some(notification)) if notification.bucket != registry.bucket() => {
                warn!(
                    bucket = %notification.bucket,
                    key = %notification.key,
                    "Skipping notification for a bucket this registry does not serve"
                );
                outcome.skipped += 1;
            }
            Ok(Some(notification)) => notifications.push(notification),
            Ok(None) => {
                debug!(event_name = %record.event_name, "Skipping non-create event");
                outcome.skipped += 1;
            }
            Err(e) => {
                warn!(error = %e, bucket = %record.s3.bucket.name, "Undecodable object key");
                metrics::counter!("registry.ingest.failed").increment(1);
                outcome.rejected += 1;
            }
        }
    }

    let report = registry.ingest_batch(&notifications).await;

    for failure in &report.failed {
        error!(
            bucket = %failure.bucket,
            key = %failure.key,
            code = failure.error.code(),
            error = %failure.error,
            "Failed to ingest object metadata"
        );
        if failure.error.is_client_error() {
            outcome.rejected += 1;
        } else {
            outcome.retryable += 1;
        }
    }

    outcome.ingested += report.succeeded.len();

    Ok(outcome)
}

/// Kafka consumer for S3 object notifications
pub struct NotificationConsumer {
    consumer: StreamConsumer,
    registry: Arc<Registry>,
    retry_backoff: Duration,
}

impl NotificationConsumer {
    /// Create a new Kafka consumer for storage notifications
    pub fn new(config: &KafkaConfig, registry: Arc<Registry>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

        // Configure SSL if enabled
        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        // Configure SASL if credentials provided
        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.notifications_topic])
            .context("Failed to subscribe to notifications topic")?;

        info!(
            topic = %config.notifications_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            registry,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Consume notifications until `shutdown` is cancelled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting notification consumer");

        let mut message_stream = self.consumer.stream();

        loop {
            let message_result = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Notification consumer stopping");
                    break;
                }
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            match message_result {
                Ok(message) => self.process_message(&message).await,
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("registry.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Process a single Kafka message.
    ///
    /// The offset is committed when nothing needs redelivery. Otherwise the
    /// partition is rewound to this message, so a later commit on the same
    /// partition can never skip past it.
    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) {
        let Some(payload) = message.payload() else {
            warn!("Dropping message without payload");
            metrics::counter!("registry.messages.dropped").increment(1);
            self.commit(message);
            return;
        };

        match handle_payload(&self.registry, payload).await {
            Ok(outcome) if outcome.should_commit() => {
                debug!(
                    ingested = outcome.ingested,
                    rejected = outcome.rejected,
                    skipped = outcome.skipped,
                    "Notification processed"
                );
                self.commit(message);
                metrics::counter!("registry.messages.processed").increment(1);
            }
            Ok(outcome) => {
                warn!(
                    ingested = outcome.ingested,
                    retryable = outcome.retryable,
                    backoff = ?self.retry_backoff,
                    "Notification partially failed, rewinding for redelivery"
                );
                metrics::counter!("registry.messages.failed").increment(1);
                self.rewind(message).await;
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed notification");
                metrics::counter!("registry.messages.dropped").increment(1);
                self.commit(message);
            }
        }
    }

    async fn rewind(&self, message: &BorrowedMessage<'_>) {
        tokio::time::sleep(self.retry_backoff).await;

        if let Err(e) = self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            SEEK_TIMEOUT,
        ) {
            // Without the seek the group could commit past this message
            error!(error = %e, "Failed to rewind partition for redelivery");
            metrics::counter!("registry.kafka.errors").increment(1);
        }
    }

    fn commit(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            warn!(error = %e, "Failed to commit offset");
        }
    }
}
