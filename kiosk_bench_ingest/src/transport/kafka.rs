use std::time::Duration;

use async_trait::async_trait;
use observability_deps::tracing::info;
use rdkafka::{
    ClientConfig, Message,
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
};

use super::{InboundTransport, PollError, RawMessage};

/// A group consumer subscribed to a single topic
pub struct KafkaInbound {
    topic: String,
    consumer: Option<StreamConsumer>,
}

// StreamConsumer doesn't impl Debug
impl std::fmt::Debug for KafkaInbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaInbound")
            .field("topic", &self.topic)
            .field("subscribed", &self.consumer.is_some())
            .finish()
    }
}

impl KafkaInbound {
    /// Create the consumer from `cfg` and subscribe it to `topic`
    ///
    /// Offset commits are left to the client's auto-commit, configured in `cfg`.
    pub fn new(cfg: &ClientConfig, topic: impl Into<String>) -> Result<Self, KafkaError> {
        let topic = topic.into();
        let consumer: StreamConsumer = cfg.create()?;
        consumer.subscribe(&[&topic])?;
        info!(%topic, "subscribed kafka consumer");

        Ok(Self {
            topic,
            consumer: Some(consumer),
        })
    }
}

fn classify(e: KafkaError) -> PollError {
    match e {
        KafkaError::PartitionEOF(_) | KafkaError::MessageConsumption(_) => {
            PollError::Transient(Box::new(e))
        }
        e => PollError::Fatal(Box::new(e)),
    }
}

#[async_trait]
impl InboundTransport for KafkaInbound {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, PollError> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| PollError::Fatal("consumer already closed".into()))?;

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(classify(e)),
            Ok(Ok(message)) => Ok(Some(RawMessage {
                payload: message.payload().map(<[u8]>::to_vec),
                key: message.key().map(<[u8]>::to_vec),
                partition: message.partition(),
                offset: message.offset(),
            })),
        }
    }

    async fn close(&mut self) -> Result<(), PollError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(topic = %self.topic, "closed kafka consumer");
        }
        Ok(())
    }
}
