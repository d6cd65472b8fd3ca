//! Implementation of the `consume` command
use std::sync::Arc;

use anyhow::Context;
use iox_time::SystemProvider;
use kiosk_bench_clap_blocks::{
    batch::BatchingConfig, kafka::KafkaConsumerConfig, postgres::PostgresSinkConfig,
};
use kiosk_bench_ingest::{
    BulkPersister, IngestLoop, KafkaInbound, PgSink, RecordDecoder, StatementSink,
};
use kiosk_bench_shutdown::ShutdownController;
use observability_deps::tracing::{info, warn};
use secrecy::ExposeSecret;
use trogging::cli::LoggingConfig;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    kafka: KafkaConsumerConfig,

    #[clap(flatten)]
    postgres: PostgresSinkConfig,

    #[clap(flatten)]
    batching: BatchingConfig,

    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,
}

pub(crate) async fn command(config: Config) -> Result<(), anyhow::Error> {
    let ingest_config = config
        .batching
        .ingest_config(config.kafka.poll_timeout)
        .context("invalid batching configuration")?;
    let table = config.postgres.validated_table()?.to_string();

    // do not log the database url as it may contain credentials
    info!(
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        group_id = %config.kafka.group_id,
        %table,
        batch_size = ingest_config.batch.size_threshold(),
        batch_time = ?ingest_config.batch.time_threshold(),
        poll_timeout = ?ingest_config.poll_timeout,
        "starting consumer"
    );

    let mut sink = PgSink::connect(config.postgres.database_url.expose_secret())
        .await
        .context("failed to connect to postgres")?;
    if let Err(e) = sink.ping().await {
        if let Err(e) = sink.close().await {
            warn!(%e, "error closing database connection");
        }
        return Err(e).context("postgres connection is not usable");
    }

    let transport = match KafkaInbound::new(&config.kafka.client_config(), &config.kafka.topic) {
        Ok(transport) => transport,
        Err(e) => {
            if let Err(e) = sink.close().await {
                warn!(%e, "error closing database connection");
            }
            return Err(e).context("failed to create kafka consumer");
        }
    };

    let shutdown = ShutdownController::new();
    let signals = shutdown.listen_for_signals();

    let decoder = RecordDecoder::new(
        config.batching.origin_tag.clone(),
        Arc::new(SystemProvider::new()),
    );
    let result = IngestLoop::new(
        transport,
        decoder,
        BulkPersister::new(table, sink),
        ingest_config,
        shutdown.clone(),
    )
    .run()
    .await;

    // stops the signal listener when the loop ended on its own
    shutdown.request_shutdown();
    if let Err(e) = signals.await {
        warn!(%e, "signal listener failed");
    }

    let summary = result.context("ingest loop failed")?;
    info!(
        total_processed = summary.total_processed,
        flushes = summary.flushes(),
        decode_errors = summary.decode_errors,
        "consumer closed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_all_blocks() {
        let config = Config::try_parse_from([
            "consume",
            "--database-url",
            "postgres://localhost/kiosk",
            "--batch-size",
            "500",
            "--poll-timeout",
            "100ms",
        ])
        .unwrap();

        let ingest = config
            .batching
            .ingest_config(config.kafka.poll_timeout)
            .unwrap();
        assert_eq!(ingest.batch.size_threshold(), 500);
        assert_eq!(ingest.poll_timeout, Duration::from_millis(100));
        assert_eq!(config.postgres.validated_table().unwrap(), "kiosk_events");
    }

    #[test]
    fn database_url_is_required() {
        // only holds when the variable isn't set in the test environment
        if std::env::var_os("KIOSK_BENCH_DATABASE_URL").is_none() {
            assert!(Config::try_parse_from(["consume"]).is_err());
        }
    }
}
