//! NATS JetStream-backed event log.
//!
//! Each execution's lifecycle events go to the subject
//! `execution.events.<execution_id>` in a file-backed stream, so one
//! execution's history can be replayed without reading anyone else's.

use crate::error::RecoveryError;
use crate::event::EventMessage;
use crate::store::EventLog;
use async_nats::jetstream;
use async_trait::async_trait;
use flotilla_core::ExecutionId;
use futures::{Stream, StreamExt};
use rootcause::prelude::Report;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Subject prefix for execution events.
const EVENTS_SUBJECT_PREFIX: &str = "execution.events";

/// Default stream name.
const EVENTS_STREAM_NAME: &str = "EXECUTION_EVENTS";

/// How long replay waits for each expected message.
const REPLAY_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`NatsEventLog`].
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name (defaults to `EXECUTION_EVENTS`).
    pub stream_name: Option<String>,
}

impl NatsConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(EVENTS_STREAM_NAME)
    }
}

/// Event log stored in a JetStream stream.
pub struct NatsEventLog {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsEventLog {
    /// Connects and makes sure the stream exists.
    ///
    /// # Errors
    ///
    /// Returns `EventLogFailed` if the connection or stream setup fails.
    pub async fn connect(config: NatsConfig) -> Result<Self, Report<RecoveryError>> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: format!("failed to connect to {}: {e}", config.url),
            })?;
        let jetstream = jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{EVENTS_SUBJECT_PREFIX}.>")],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: format!("failed to create events stream: {e}"),
            })?;

        Ok(Self { jetstream, config })
    }

    fn subject(id: ExecutionId) -> String {
        format!("{EVENTS_SUBJECT_PREFIX}.{}", id.as_ulid())
    }

    /// Appends one event to an execution's log and waits for the ack.
    ///
    /// # Errors
    ///
    /// Returns `EventLogFailed` if the event cannot be encoded or published.
    #[instrument(skip(self, event), fields(execution_id = %id, event = event.event_name()))]
    pub async fn append(
        &self,
        id: ExecutionId,
        event: &EventMessage,
    ) -> Result<(), Report<RecoveryError>> {
        let bytes = serde_json::to_vec(event).map_err(|e| RecoveryError::EventLogFailed {
            message: format!("failed to serialize event: {e}"),
        })?;

        self.jetstream
            .publish(Self::subject(id), bytes.into())
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventLog for NatsEventLog {
    #[instrument(skip(self), fields(execution_id = %id))]
    async fn load_events(&self, id: ExecutionId) -> Result<Vec<EventMessage>, Report<RecoveryError>> {
        let stream = self
            .jetstream
            .get_stream(self.config.stream())
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: format!("failed to get stream: {e}"),
            })?;

        let mut consumer = stream
            .create_consumer(jetstream::consumer::pull::Config {
                filter_subject: Self::subject(id),
                deliver_policy: jetstream::consumer::DeliverPolicy::All,
                ..Default::default()
            })
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: format!("failed to create consumer: {e}"),
            })?;

        let expected = consumer
            .info()
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: format!("failed to read consumer info: {e}"),
            })?
            .num_pending;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| RecoveryError::EventLogFailed {
                message: format!("failed to get messages: {e}"),
            })?;

        let mut events = Vec::new();
        for message in drain_exact(messages, expected, REPLAY_MESSAGE_TIMEOUT).await? {
            match serde_json::from_slice::<EventMessage>(&message.payload) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "skipping undecodable event"),
            }

            message
                .ack()
                .await
                .map_err(|e| RecoveryError::EventLogFailed {
                    message: format!("failed to ack message: {e}"),
                })?;
        }

        debug!(count = events.len(), expected, "loaded execution events");
        Ok(events)
    }
}

/// Reads exactly `expected` items from `messages`.
///
/// Anything short of that is an error: a partial history would be rebuilt
/// into a wrong record.
async fn drain_exact<S, M, E>(
    mut messages: S,
    expected: u64,
    wait: Duration,
) -> Result<Vec<M>, Report<RecoveryError>>
where
    S: Stream<Item = Result<M, E>> + Unpin,
    E: Display,
{
    let mut received = Vec::new();
    while (received.len() as u64) < expected {
        let next = tokio::time::timeout(wait, messages.next())
            .await
            .map_err(|_| RecoveryError::EventLogFailed {
                message: format!(
                    "timed out after {} of {expected} events",
                    received.len()
                ),
            })?;

        match next {
            Some(Ok(message)) => received.push(message),
            Some(Err(e)) => {
                return Err(RecoveryError::EventLogFailed {
                    message: e.to_string(),
                }
                .into());
            }
            None => {
                return Err(RecoveryError::EventLogFailed {
                    message: format!(
                        "stream closed after {} of {expected} events",
                        received.len()
                    ),
                }
                .into());
            }
        }
    }
    Ok(received)
}
