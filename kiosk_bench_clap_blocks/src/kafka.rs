//! Kafka client configuration for the producer and the consumer.
use std::time::Duration;

use rdkafka::ClientConfig;

/// Compression codec applied to produced batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    #[default]
    Lz4,
    Zstd,
}

impl Compression {
    fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

/// CLI config for the Kafka producer.
#[derive(Debug, Clone, clap::Parser)]
pub struct KafkaProducerConfig {
    /// Comma separated list of bootstrap brokers.
    #[clap(
        long = "brokers",
        env = "KIOSK_BENCH_KAFKA_BROKERS",
        default_value = "localhost:9092",
        action
    )]
    pub brokers: String,

    /// Topic the events are published to.
    #[clap(
        long = "topic",
        env = "KIOSK_BENCH_KAFKA_TOPIC",
        default_value = "kiosk-events",
        action
    )]
    pub topic: String,

    /// Number of broker acknowledgements required for a write.
    #[clap(
        long = "acks",
        env = "KIOSK_BENCH_KAFKA_ACKS",
        default_value = "1",
        value_parser = ["0", "1", "-1", "all"],
    )]
    pub acks: String,

    /// How long the client waits to fill a batch before sending it.
    #[clap(
        long = "linger",
        env = "KIOSK_BENCH_KAFKA_LINGER",
        default_value = "5ms",
        value_parser = humantime::parse_duration,
    )]
    pub linger: Duration,

    /// Maximum size of a produced batch, in bytes.
    #[clap(
        long = "batch-bytes",
        env = "KIOSK_BENCH_KAFKA_BATCH_BYTES",
        default_value = "65536",
        action
    )]
    pub batch_bytes: u32,

    /// Compression codec for produced batches.
    #[clap(
        long = "compression",
        env = "KIOSK_BENCH_KAFKA_COMPRESSION",
        default_value = "lz4",
        value_enum
    )]
    pub compression: Compression,

    /// Maximum number of messages held in the local send queue.
    ///
    /// Publishing into a full queue is reported as backpressure.
    #[clap(
        long = "queue-max-messages",
        env = "KIOSK_BENCH_KAFKA_QUEUE_MAX_MESSAGES",
        default_value = "1000000",
        action
    )]
    pub queue_max_messages: u32,

    /// Maximum total size of the local send queue, in KiB.
    #[clap(
        long = "queue-max-kbytes",
        env = "KIOSK_BENCH_KAFKA_QUEUE_MAX_KBYTES",
        default_value = "1048576",
        action
    )]
    pub queue_max_kbytes: u32,
}

impl KafkaProducerConfig {
    pub fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.brokers)
            .set("acks", &self.acks)
            .set("linger.ms", self.linger.as_millis().to_string())
            .set("batch.size", self.batch_bytes.to_string())
            .set("compression.type", self.compression.as_str())
            .set(
                "queue.buffering.max.messages",
                self.queue_max_messages.to_string(),
            )
            .set(
                "queue.buffering.max.kbytes",
                self.queue_max_kbytes.to_string(),
            );
        cfg
    }
}

/// Where a new consumer group starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

/// CLI config for the Kafka consumer.
#[derive(Debug, Clone, clap::Parser)]
pub struct KafkaConsumerConfig {
    /// Comma separated list of bootstrap brokers.
    #[clap(
        long = "brokers",
        env = "KIOSK_BENCH_KAFKA_BROKERS",
        default_value = "localhost:9092",
        action
    )]
    pub brokers: String,

    /// Topic to consume events from.
    #[clap(
        long = "topic",
        env = "KIOSK_BENCH_KAFKA_TOPIC",
        default_value = "kiosk-events",
        action
    )]
    pub topic: String,

    /// Consumer group id.
    #[clap(
        long = "group-id",
        env = "KIOSK_BENCH_KAFKA_GROUP_ID",
        default_value = "bench-group",
        action
    )]
    pub group_id: String,

    /// Upper bound on a single poll for the next message.
    #[clap(
        long = "poll-timeout",
        env = "KIOSK_BENCH_KAFKA_POLL_TIMEOUT",
        default_value = "50ms",
        value_parser = humantime::parse_duration,
    )]
    pub poll_timeout: Duration,

    /// How often consumed offsets are committed.
    ///
    /// Commits are independent of database writes: a crash between an insert and the next
    /// commit re-delivers (and re-inserts) the messages of that window.
    #[clap(
        long = "auto-commit-interval",
        env = "KIOSK_BENCH_KAFKA_AUTO_COMMIT_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration,
    )]
    pub auto_commit_interval: Duration,

    /// Starting position for a group without committed offsets.
    #[clap(
        long = "offset-reset",
        env = "KIOSK_BENCH_KAFKA_OFFSET_RESET",
        default_value = "earliest",
        value_enum
    )]
    pub offset_reset: OffsetReset,
}

impl KafkaConsumerConfig {
    pub fn client_config(&self) -> ClientConfig {
        let offset_reset = match self.offset_reset {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        };

        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                self.auto_commit_interval.as_millis().to_string(),
            )
            .set("auto.offset.reset", offset_reset);
        cfg
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn producer_defaults() {
        let config = KafkaProducerConfig::try_parse_from(["producer"]).unwrap();
        let cfg = config.client_config();

        assert_eq!(cfg.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(cfg.get("acks"), Some("1"));
        assert_eq!(cfg.get("linger.ms"), Some("5"));
        assert_eq!(cfg.get("batch.size"), Some("65536"));
        assert_eq!(cfg.get("compression.type"), Some("lz4"));
        assert_eq!(cfg.get("queue.buffering.max.messages"), Some("1000000"));
        assert_eq!(cfg.get("queue.buffering.max.kbytes"), Some("1048576"));
    }

    #[test]
    fn producer_overrides() {
        let config = KafkaProducerConfig::try_parse_from([
            "producer",
            "--brokers",
            "kafka-1:9092,kafka-2:9092",
            "--acks",
            "all",
            "--linger",
            "20ms",
            "--compression",
            "zstd",
        ])
        .unwrap();
        let cfg = config.client_config();

        assert_eq!(cfg.get("bootstrap.servers"), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(cfg.get("acks"), Some("all"));
        assert_eq!(cfg.get("linger.ms"), Some("20"));
        assert_eq!(cfg.get("compression.type"), Some("zstd"));
    }

    #[test]
    fn producer_rejects_unknown_acks() {
        assert!(KafkaProducerConfig::try_parse_from(["producer", "--acks", "2"]).is_err());
    }

    #[test]
    fn consumer_defaults() {
        let config = KafkaConsumerConfig::try_parse_from(["consumer"]).unwrap();
        assert_eq!(config.poll_timeout, Duration::from_millis(50));

        let cfg = config.client_config();
        assert_eq!(cfg.get("group.id"), Some("bench-group"));
        assert_eq!(cfg.get("enable.auto.commit"), Some("true"));
        assert_eq!(cfg.get("auto.commit.interval.ms"), Some("1000"));
        assert_eq!(cfg.get("auto.offset.reset"), Some("earliest"));
    }
}
