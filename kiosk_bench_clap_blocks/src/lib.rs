//! Building blocks for the [`clap`]-based configuration of the benchmark binary.
pub mod batch;
pub mod kafka;
pub mod postgres;
