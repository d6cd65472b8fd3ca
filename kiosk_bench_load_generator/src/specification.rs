use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventTemplate;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read emit spec from {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse emit spec: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cycle interval must be non-zero when more than one cycle is configured")]
    ZeroCycleInterval,
}

/// The specification for a production run
///
/// A run is a single initial burst of `initial_count` events followed by `cycles` bursts of
/// `cycle_size` events, started `cycle_interval` apart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmitSpec {
    /// The name of this spec
    pub name: String,
    /// Number of events produced, as fast as the transport accepts them, in the first phase
    pub initial_count: u64,
    /// How long to wait for the transport to deliver the first phase before moving on
    #[serde(with = "humantime_serde")]
    pub initial_flush_timeout: Duration,
    /// Number of paced bursts in the second phase
    pub cycles: u32,
    /// Number of events in each paced burst
    pub cycle_size: u64,
    /// Target start-to-start time between paced bursts
    #[serde(with = "humantime_serde")]
    pub cycle_interval: Duration,
    /// How long to wait for each burst to be delivered
    #[serde(with = "humantime_serde")]
    pub cycle_flush_timeout: Duration,
    /// Fixed payload fields for every event
    #[serde(default)]
    pub template: EventTemplate,
}

impl EmitSpec {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let spec: Self = serde_json::from_str(&contents)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, SpecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.cycles > 1 && self.cycle_interval.is_zero() {
            return Err(SpecError::ZeroCycleInterval);
        }
        Ok(())
    }

    /// Total number of events the run delivers to the transport
    pub fn total_events(&self) -> u64 {
        u64::from(self.cycles)
            .saturating_mul(self.cycle_size)
            .saturating_add(self.initial_count)
    }
}

/// Specs that ship with the binary
pub fn built_in_specs() -> Vec<EmitSpec> {
    vec![
        EmitSpec {
            name: "kiosk_default".to_string(),
            initial_count: 1_000_000,
            initial_flush_timeout: Duration::from_secs(60),
            cycles: 5,
            cycle_size: 100_000,
            cycle_interval: Duration::from_secs(60),
            cycle_flush_timeout: Duration::from_secs(30),
            template: EventTemplate::default(),
        },
        EmitSpec {
            name: "kiosk_smoke".to_string(),
            initial_count: 10_000,
            initial_flush_timeout: Duration::from_secs(10),
            cycles: 2,
            cycle_size: 1_000,
            cycle_interval: Duration::from_secs(10),
            cycle_flush_timeout: Duration::from_secs(5),
            template: EventTemplate::default(),
        },
    ]
}

pub fn built_in_spec_names() -> Vec<String> {
    built_in_specs().into_iter().map(|s| s.name).collect()
}
