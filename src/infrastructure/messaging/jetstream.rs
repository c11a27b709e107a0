use std::sync::Arc;
use std::time::Duration;

use async_nats::{
    HeaderMap,
    connection::State,
    header::NATS_MESSAGE_ID,
    jetstream::{self, context::PublishErrorKind},
};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    application::services::event_bus::EventPublisher,
    domain::{errors::PublishError, events::BrokerMessage, models::OutboxEvent},
};

pub const HEADER_EVENT_TYPE: &str = "Outbox-Event-Type";
pub const HEADER_EVENT_VERSION: &str = "Outbox-Event-Version";
pub const HEADER_AGGREGATE_ID: &str = "Outbox-Aggregate-Id";
pub const HEADER_PARTITION_KEY: &str = "Outbox-Partition-Key";

#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    pub url: String,
    pub stream: String,
    pub subject_prefix: String,
    /// Window in which JetStream drops repeats of the same `Nats-Msg-Id`.
    pub duplicate_window: Duration,
    pub connect_timeout: Duration,
    pub max_payload_bytes: usize,
}

pub struct JetstreamPublisher {
    client: async_nats::Client,
    context: jetstream::Context,
    subject_prefix: String,
    max_payload_bytes: usize,
}

impl JetstreamPublisher {
    /// Connects and makes sure the stream covering `<prefix>.>` exists.
    pub async fn connect(config: &JetstreamConfig) -> anyhow::Result<Arc<Self>> {
        let client = async_nats::ConnectOptions::new()
            .name("outbox-relay")
            .connection_timeout(config.connect_timeout)
            .connect(config.url.as_str())
            .await?;
        let context = jetstream::new(client.clone());

        context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![format!("{}.>", config.subject_prefix)],
                duplicate_window: config.duplicate_window,
                ..Default::default()
            })
            .await?;
        info!(url = %config.url, stream = %config.stream, "connected to jetstream");

        Ok(Arc::new(Self {
            client,
            context,
            subject_prefix: config.subject_prefix.clone(),
            max_payload_bytes: config.max_payload_bytes,
        }))
    }

    fn subject_for(&self, event_type: &str) -> String {
        subject_for(&self.subject_prefix, event_type)
    }
}

#[async_trait]
impl EventPublisher for JetstreamPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError> {
        let message = BrokerMessage::from(event);
        let payload = serde_json::to_vec(&message)
            .map_err(|err| PublishError::Permanent(format!("unserializable payload: {err}")))?;
        if payload.len() > self.max_payload_bytes {
            return Err(PublishError::Permanent(format!(
                "payload of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_payload_bytes
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(NATS_MESSAGE_ID, message.id.to_string().as_str());
        headers.insert(HEADER_EVENT_TYPE, message.event_type.as_str());
        headers.insert(HEADER_EVENT_VERSION, message.version.as_str());
        headers.insert(HEADER_PARTITION_KEY, message.partition_key().as_str());
        if let Some(aggregate_id) = &message.aggregate_id {
            headers.insert(HEADER_AGGREGATE_ID, aggregate_id.as_str());
        }

        let ack = self
            .context
            .publish_with_headers(self.subject_for(&message.event_type), headers, payload.into())
            .await
            .map_err(classify)?
            .await
            .map_err(classify)?;

        debug!(
            event_id = %message.id,
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "event acknowledged by broker"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }
}

fn classify(err: jetstream::context::PublishError) -> PublishError {
    let permanent = matches!(
        err.kind(),
        PublishErrorKind::StreamNotFound
            | PublishErrorKind::WrongLastMessageId
            | PublishErrorKind::WrongLastSequence
    );
    if permanent {
        PublishError::Permanent(err.to_string())
    } else {
        PublishError::Transient(err.to_string())
    }
}

/// NATS subject for an event type. Wildcards and whitespace become `_` and
/// empty tokens are dropped.
pub fn subject_for(prefix: &str, event_type: &str) -> String {
    let sanitized: String = event_type
        .chars()
        .map(|c| match c {
            '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    let tokens: Vec<&str> = sanitized.split('.').filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        format!("{prefix}.unknown")
    } else {
        format!("{prefix}.{}", tokens.join("."))
    }
}
