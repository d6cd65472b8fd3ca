//! Phased, backpressure-aware emission of synthetic events.
//!
//! A run has two phases. The initial phase pushes a large burst as fast as the transport will
//! take it. The periodic phase pushes smaller bursts paced so that consecutive bursts start a
//! fixed interval apart. Every phase ends by waiting, for a bounded time, for the transport to
//! deliver what was enqueued.

use std::{ops::AddAssign, sync::Arc, time::Duration};

use iox_time::TimeProvider;
use observability_deps::tracing::{debug, info, warn};
use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    event::{EventError, EventSerializer, EventTemplate, SyntheticEvent, random_historical_timestamp},
    sequence::{ENTITY_CHUNK_SIZE, SequenceAllocator},
    specification::EmitSpec,
    transport::{FlushError, OutboundTransport, PublishError},
};

/// Default pause before retrying after the transport reports a full queue
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Progress is logged every time a sequence number that is a multiple of this is allocated
pub const PROGRESS_LOG_INTERVAL: u64 = ENTITY_CHUNK_SIZE;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("failed to publish sequence {sequence}: {source}")]
    Publish {
        sequence: u64,
        source: PublishError,
    },

    #[error("failed to flush after {phase}: {source}")]
    Flush { phase: String, source: FlushError },
}

/// What to do with an event the transport refused because its local queue was full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BackpressurePolicy {
    /// Discard the refused event and carry on with a freshly allocated one.
    ///
    /// The refused sequence number is consumed but never delivered, so the run allocates more
    /// sequences than it delivers. Keeps the configured number of deliveries per phase.
    #[default]
    DropAndContinue,

    /// Resubmit the identical event, with the same sequence number, until it is accepted.
    ResendSame,
}

/// Counters describing one phase, or a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Sequence numbers allocated
    pub allocated: u64,
    /// Records accepted by the transport
    pub accepted: u64,
    /// Records refused by the transport and then discarded
    pub dropped: u64,
    /// Number of times the transport reported a full queue
    pub backpressure_events: u64,
    /// The highest sequence number issued
    pub last_sequence: u64,
}

impl AddAssign for EmitReport {
    fn add_assign(&mut self, rhs: Self) {
        self.allocated += rhs.allocated;
        self.accepted += rhs.accepted;
        self.dropped += rhs.dropped;
        self.backpressure_events += rhs.backpressure_events;
        self.last_sequence = self.last_sequence.max(rhs.last_sequence);
    }
}

/// Outcome of a single call to [`PhasedEmitter::emit_one`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The record was enqueued after `retries` refusals
    Accepted { sequence: u64, retries: u64 },
    /// The record was refused and discarded
    Dropped { sequence: u64 },
}

/// How long to sleep after a paced cycle that took `elapsed`, so that cycles start `interval`
/// apart. No sleep follows the last cycle or a cycle that overran its interval.
pub fn pacing_delay(interval: Duration, elapsed: Duration, is_last: bool) -> Option<Duration> {
    if is_last {
        return None;
    }
    interval.checked_sub(elapsed).filter(|d| !d.is_zero())
}

/// Drives a production run against an [`OutboundTransport`]
#[derive(Debug)]
pub struct PhasedEmitter<T> {
    transport: T,
    topic: String,
    sequence: SequenceAllocator,
    serializer: EventSerializer,
    time_provider: Arc<dyn TimeProvider>,
    rng: StdRng,
    policy: BackpressurePolicy,
    retry_delay: Duration,
}

impl<T: OutboundTransport> PhasedEmitter<T> {
    pub fn new(transport: T, topic: impl Into<String>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            transport,
            topic: topic.into(),
            sequence: SequenceAllocator::new(),
            serializer: EventSerializer,
            time_provider,
            rng: StdRng::from_entropy(),
            policy: BackpressurePolicy::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_backpressure_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Continue numbering after a previously issued sequence
    pub fn with_sequence(mut self, sequence: SequenceAllocator) -> Self {
        self.sequence = sequence;
        self
    }

    /// Seed the generator of event timestamps, for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn sequence(&self) -> &SequenceAllocator {
        &self.sequence
    }

    /// Execute the initial burst followed by the paced cycles described by `spec`
    pub async fn run(&mut self, spec: &EmitSpec) -> Result<EmitReport, EmitError> {
        info!(
            spec = %spec.name,
            topic = %self.topic,
            initial_count = spec.initial_count,
            policy = ?self.policy,
            "starting initial phase"
        );
        let mut total = self.emit_phase(spec.initial_count, &spec.template).await?;
        self.flush_phase("initial phase", spec.initial_flush_timeout)
            .await?;
        info!(
            accepted = total.accepted,
            dropped = total.dropped,
            "finished initial phase"
        );

        if spec.cycles > 0 {
            info!(
                cycles = spec.cycles,
                cycle_size = spec.cycle_size,
                interval = ?spec.cycle_interval,
                "starting periodic phase"
            );
        }
        for cycle in 1..=spec.cycles {
            let cycle_start = Instant::now();
            info!(cycle, cycles = spec.cycles, "starting cycle");

            total += self.emit_phase(spec.cycle_size, &spec.template).await?;
            self.flush_phase(&format!("cycle {cycle}"), spec.cycle_flush_timeout)
                .await?;

            let elapsed = cycle_start.elapsed();
            info!(cycle, cycles = spec.cycles, ?elapsed, "completed cycle");

            if let Some(wait) = pacing_delay(spec.cycle_interval, elapsed, cycle == spec.cycles) {
                info!(?wait, "waiting until next cycle");
                tokio::time::sleep(wait).await;
            }
        }

        info!(
            allocated = total.allocated,
            accepted = total.accepted,
            dropped = total.dropped,
            backpressure_events = total.backpressure_events,
            last_sequence = total.last_sequence,
            "all phases completed"
        );
        Ok(total)
    }

    /// Emit until `count` records have been accepted by the transport
    pub async fn emit_phase(
        &mut self,
        count: u64,
        template: &EventTemplate,
    ) -> Result<EmitReport, EmitError> {
        let mut report = EmitReport::default();
        while report.accepted < count {
            match self.emit_one(template).await? {
                EmitOutcome::Accepted { sequence, retries } => {
                    report.allocated += 1;
                    report.accepted += 1;
                    report.backpressure_events += retries;
                    report.last_sequence = sequence;
                }
                EmitOutcome::Dropped { sequence } => {
                    report.allocated += 1;
                    report.dropped += 1;
                    report.backpressure_events += 1;
                    report.last_sequence = sequence;
                }
            }
        }
        Ok(report)
    }

    /// Allocate a sequence number, build and serialize its event, and enqueue it
    ///
    /// A full transport queue is answered by sleeping for the retry delay and then applying the
    /// configured [`BackpressurePolicy`]. Any other transport error is returned.
    pub async fn emit_one(&mut self, template: &EventTemplate) -> Result<EmitOutcome, EmitError> {
        let sequence = self.sequence.allocate();
        if sequence % PROGRESS_LOG_INTERVAL == 0 {
            info!(sequence, "produced messages");
        }

        let now = self.time_provider.now().date_time();
        let event_ts = random_historical_timestamp(&mut self.rng, now);
        let event = SyntheticEvent::new(template, sequence, event_ts)?;
        let record = self.serializer.serialize(sequence, &event)?;

        let mut retries = 0;
        loop {
            match self.transport.publish(&self.topic, &record) {
                Ok(()) => return Ok(EmitOutcome::Accepted { sequence, retries }),
                Err(PublishError::QueueFull) => {
                    tokio::time::sleep(self.retry_delay).await;
                    match self.policy {
                        BackpressurePolicy::DropAndContinue => {
                            debug!(sequence, "producer queue full, dropping event");
                            return Ok(EmitOutcome::Dropped { sequence });
                        }
                        BackpressurePolicy::ResendSame => {
                            debug!(sequence, retries, "producer queue full, resending event");
                            retries += 1;
                        }
                    }
                }
                Err(source) => return Err(EmitError::Publish { sequence, source }),
            }
        }
    }

    async fn flush_phase(&self, phase: &str, timeout: Duration) -> Result<(), EmitError> {
        match self.transport.flush(timeout).await {
            Ok(()) => Ok(()),
            Err(FlushError::TimedOut { timeout }) => {
                warn!(phase, ?timeout, "timed out waiting for outstanding messages");
                Ok(())
            }
            Err(source) => Err(EmitError::Flush {
                phase: phase.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use iox_time::{MockProvider, Time};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{event::HISTORY_DAYS, transport::mock::MockOutbound};

    fn time_provider() -> Arc<dyn TimeProvider> {
        // 2024-06-01T00:00:00Z
        Arc::new(MockProvider::new(Time::from_timestamp_nanos(
            1_717_200_000_000_000_000,
        )))
    }

    fn emitter(transport: MockOutbound) -> PhasedEmitter<MockOutbound> {
        PhasedEmitter::new(transport, "jobs", time_provider()).with_seed(42)
    }

    fn spec(initial_count: u64, cycles: u32, cycle_size: u64) -> EmitSpec {
        EmitSpec {
            name: "test".to_string(),
            initial_count,
            initial_flush_timeout: Duration::from_secs(60),
            cycles,
            cycle_size,
            cycle_interval: Duration::from_secs(60),
            cycle_flush_timeout: Duration::from_secs(30),
            template: EventTemplate::default(),
        }
    }

    fn sequences(transport: &MockOutbound) -> Vec<u64> {
        transport.delivered().iter().map(|r| r.sequence).collect()
    }

    #[test]
    fn pacing() {
        let minute = Duration::from_secs(60);
        assert_eq!(
            pacing_delay(minute, Duration::from_secs(15), false),
            Some(Duration::from_secs(45))
        );
        assert_eq!(pacing_delay(minute, Duration::from_secs(15), true), None);
        assert_eq!(pacing_delay(minute, minute, false), None);
        assert_eq!(pacing_delay(minute, Duration::from_secs(75), false), None);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn initial_phase_without_backpressure_delivers_everything() {
        let transport = MockOutbound::new();
        let mut emitter = emitter(transport.clone());

        let report = emitter.run(&spec(1_000, 0, 0)).await.unwrap();

        assert_eq!(
            report,
            EmitReport {
                allocated: 1_000,
                accepted: 1_000,
                dropped: 0,
                backpressure_events: 0,
                last_sequence: 1_000,
            }
        );
        assert_eq!(transport.delivered_count(), 1_000);
        assert_eq!(sequences(&transport), (1..=1_000).collect::<Vec<_>>());
        assert!(transport.topics().iter().all(|t| t == "jobs"));
        assert_eq!(transport.flushes().len(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn one_million_initial_events_allocate_exactly_one_million_sequences() {
        let transport = MockOutbound::counting();
        let mut emitter = emitter(transport.clone());

        let report = emitter.run(&spec(1_000_000, 0, 0)).await.unwrap();

        assert_eq!(report.allocated, 1_000_000);
        assert_eq!(report.accepted, 1_000_000);
        assert_eq!(report.dropped, 0);
        assert_eq!(transport.delivered_count(), 1_000_000);
        assert_eq!(emitter.sequence().last_allocated(), 1_000_000);
        assert_eq!(transport.last_delivered().unwrap().key, "10");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn drop_and_continue_consumes_refused_sequences() {
        let transport = MockOutbound::new();
        transport.queue_full_on_attempt(3).queue_full_on_attempt(7);
        let mut emitter = emitter(transport.clone());

        let report = emitter.run(&spec(10, 0, 0)).await.unwrap();

        assert_eq!(report.allocated, 12);
        assert_eq!(report.accepted, 10);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.backpressure_events, 2);
        assert_eq!(report.allocated - report.accepted, report.dropped);

        assert_eq!(transport.delivered_count(), 10);
        assert_eq!(sequences(&transport), vec![1, 2, 4, 5, 6, 8, 9, 10, 11, 12]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn resend_same_redelivers_the_refused_event() {
        let transport = MockOutbound::new();
        transport.queue_full_on_attempt(3).queue_full_on_attempt(4);
        let mut emitter = emitter(transport.clone())
            .with_backpressure_policy(BackpressurePolicy::ResendSame);

        let start = Instant::now();
        let report = emitter.emit_phase(10, &EventTemplate::default()).await.unwrap();

        assert_eq!(report.allocated, 10);
        assert_eq!(report.accepted, 10);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.backpressure_events, 2);
        assert_eq!(transport.attempts(), 12);
        assert_eq!(sequences(&transport), (1..=10).collect::<Vec<_>>());
        // two retry delays were slept
        assert_eq!(start.elapsed(), DEFAULT_RETRY_DELAY * 2);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn fatal_publish_error_aborts_the_run() {
        let transport = MockOutbound::new();
        transport.fatal_on_attempt(5);
        let mut emitter = emitter(transport.clone());

        let err = emitter.run(&spec(10, 2, 10)).await.unwrap_err();

        assert!(
            matches!(
                err,
                EmitError::Publish {
                    sequence: 5,
                    source: PublishError::Fatal(_)
                }
            ),
            "{err}"
        );
        assert_eq!(transport.delivered_count(), 4);
        assert!(transport.flushes().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn sequences_span_both_phases() {
        let transport = MockOutbound::new();
        let mut emitter = emitter(transport.clone());

        let report = emitter.run(&spec(5, 2, 3)).await.unwrap();

        assert_eq!(report.accepted, 11);
        assert_eq!(report.last_sequence, 11);
        assert_eq!(sequences(&transport), (1..=11).collect::<Vec<_>>());
        // one flush for the initial phase, one per cycle
        assert_eq!(transport.flushes().len(), 3);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn cycles_start_one_interval_apart() {
        let transport = MockOutbound::new();
        transport.set_flush_delay(Duration::from_secs(5));
        let mut emitter = emitter(transport.clone());

        let start = Instant::now();
        emitter.run(&spec(100, 3, 10)).await.unwrap();

        let flushes = transport.flushes();
        assert_eq!(flushes.len(), 4);
        // the initial flush takes 5s, then each cycle starts a minute after the previous one
        assert_eq!(flushes[1] - start, Duration::from_secs(5));
        assert_eq!(flushes[2] - flushes[1], Duration::from_secs(60));
        assert_eq!(flushes[3] - flushes[2], Duration::from_secs(60));
        // no pause follows the last cycle
        assert_eq!(start.elapsed(), Duration::from_secs(5 + 60 + 60 + 5));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn overrunning_cycles_are_not_delayed() {
        let transport = MockOutbound::new();
        transport.set_flush_delay(Duration::from_secs(70));
        let mut emitter = emitter(transport.clone());
        let mut spec = spec(0, 3, 10);
        spec.initial_flush_timeout = Duration::from_secs(80);
        spec.cycle_flush_timeout = Duration::from_secs(80);

        let start = Instant::now();
        emitter.run(&spec).await.unwrap();

        let flushes = transport.flushes();
        assert_eq!(flushes[2] - flushes[1], Duration::from_secs(70));
        assert_eq!(flushes[3] - flushes[2], Duration::from_secs(70));
        assert_eq!(start.elapsed(), Duration::from_secs(4 * 70));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn flush_timeout_is_not_fatal() {
        let transport = MockOutbound::new();
        transport.set_flush_delay(Duration::from_secs(600));
        let mut emitter = emitter(transport.clone());

        let start = Instant::now();
        let report = emitter.run(&spec(20, 1, 5)).await.unwrap();

        assert_eq!(report.accepted, 25);
        // bounded by the 60s initial and 30s cycle flush timeouts
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn events_carry_template_and_historical_timestamps() {
        let transport = MockOutbound::new();
        let mut emitter =
            emitter(transport.clone()).with_sequence(SequenceAllocator::starting_after(99_998));
        let now = time_provider().now().date_time();

        emitter.run(&spec(3, 0, 0)).await.unwrap();

        let delivered = transport.delivered();
        assert_eq!(sequences(&transport), vec![99_999, 100_000, 100_001]);
        let keys: Vec<_> = delivered.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["0", "1", "1"]);
        for record in &delivered {
            let event: SyntheticEvent = serde_json::from_str(&record.value).unwrap();
            assert_eq!(event.kiosk_id as u64, record.sequence / 100_000);
            assert_eq!(record.key, event.kiosk_id.to_string());
            assert_eq!(event.event_type, "visit");
            assert_eq!(event.mall_id, 1);
            let age: chrono::Duration = now - event.event_ts;
            assert!(age >= chrono::Duration::zero());
            assert!(age < chrono::Duration::days(HISTORY_DAYS));
        }
    }
}
