//! Consumer side of the kiosk ingestion benchmark.
//!
//! Messages are polled from a subscribed topic ([`transport`]), decoded into rows
//! ([`record`]), buffered until a size or time threshold is met ([`accumulator`]) and written
//! with a single multi-row insert per batch ([`persister`]). [`ingest::IngestLoop`] drives all of
//! it from one task until its [`kiosk_bench_shutdown::ShutdownController`] asks it to stop.

pub mod accumulator;
pub mod ingest;
pub mod metrics;
pub mod persister;
pub mod record;
pub mod transport;

pub use accumulator::{BatchAccumulator, BatchConfig, BatchConfigError, FlushTrigger};
pub use ingest::{IngestConfig, IngestError, IngestLoop, IngestSummary};
pub use metrics::{MetricsReporter, ThroughputReport};
pub use persister::{BulkPersister, PersistError, SinkError, StatementSink, postgres::PgSink};
pub use record::{DecodeError, RecordDecoder, RowRecord};
pub use transport::{InboundTransport, PollError, RawMessage, kafka::KafkaInbound};
