use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use observability_deps::tracing::{debug, warn};
use rdkafka::{
    ClientConfig, ClientContext, Message,
    error::KafkaError,
    producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer},
    types::RDKafkaErrorCode,
    util::Timeout,
};

use super::{FlushError, OutboundTransport, PublishError};
use crate::event::WireRecord;

/// Producer context whose delivery callback only reports failures.
///
/// Delivery reports run on librdkafka's polling thread; they must not touch anything the
/// emission loop owns.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryLogger;

impl ClientContext for DeliveryLogger {}

impl ProducerContext for DeliveryLogger {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        if let Err((e, message)) = result {
            warn!(
                error = %e,
                topic = message.topic(),
                partition = message.partition(),
                "failed to deliver message"
            );
        }
    }
}

pub struct KafkaOutbound {
    brokers: String,
    producer: Arc<ThreadedProducer<DeliveryLogger>>,
}

// Needed because rdkafka's ThreadedProducer doesn't impl Debug
impl std::fmt::Debug for KafkaOutbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaOutbound")
            .field("brokers", &self.brokers)
            .finish()
    }
}

impl KafkaOutbound {
    /// Create a producer from a fully populated client config
    pub fn new(cfg: &ClientConfig) -> Result<Self, KafkaError> {
        let brokers = cfg.get("bootstrap.servers").unwrap_or_default().to_string();
        let producer: ThreadedProducer<DeliveryLogger> = cfg.create_with_context(DeliveryLogger)?;
        debug!(%brokers, "created kafka producer");
        Ok(Self {
            brokers,
            producer: Arc::new(producer),
        })
    }
}

#[async_trait]
impl OutboundTransport for KafkaOutbound {
    fn publish(&self, topic: &str, record: &WireRecord) -> Result<(), PublishError> {
        let message = BaseRecord::to(topic)
            .key(record.key.as_str())
            .payload(record.value.as_str());

        match self.producer.send(message) {
            Ok(()) => Ok(()),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                Err(PublishError::QueueFull)
            }
            Err((e, _)) => Err(PublishError::Fatal(Box::new(e))),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), FlushError> {
        let producer = Arc::clone(&self.producer);
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| FlushError::Transport(Box::new(e)))?
            .map_err(|e| match e {
                KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut) => {
                    FlushError::TimedOut { timeout }
                }
                e => FlushError::Transport(Box::new(e)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u64) -> WireRecord {
        WireRecord {
            sequence,
            key: sequence.to_string(),
            value: format!(r#"{{"kiosk_id":{sequence}}}"#),
        }
    }

    #[test_log::test]
    fn full_local_queue_is_backpressure() {
        // nothing listens on port 1, so queued messages are never drained
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", "127.0.0.1:1")
            .set("queue.buffering.max.messages", "1")
            .set("message.timeout.ms", "1000");
        let transport = KafkaOutbound::new(&cfg).unwrap();

        transport.publish("kiosk_events", &record(1)).unwrap();
        assert!(matches!(
            transport.publish("kiosk_events", &record(2)),
            Err(PublishError::QueueFull)
        ));
    }
}
