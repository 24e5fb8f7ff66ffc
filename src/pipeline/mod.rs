//! Batch ingestion pipeline
//!
//! Reads encoded subgraphs from a file or standard input, fans their triples
//! out onto a shared channel and merges them back through the [`Merger`]
//! extension point, while a [`TelemetryMonitor`] samples runtime statistics.
//!
//! ```text
//!  RecordSource ─► decode ─► per-record tasks ─┐
//!                                              ├─► triple channel ─► merge stage
//!  RecordSource ─► decode ─► per-record tasks ─┘
//! ```
//!
//! The reader and the merge stage form the inner task group; the join of the
//! inner group and the telemetry monitor form the outer one. The first error
//! in either group cancels its siblings and becomes the run's terminal error.

pub mod coordinator;
pub mod fan_out;
pub mod group;
pub mod merge;
pub mod telemetry;

pub use coordinator::{BatchPipeline, PipelineOutcome, PipelineReport, PipelineState};
pub use merge::{LoggingMerger, Merger};
pub use telemetry::{MemorySample, MemoryTracker, TelemetryMonitor, TelemetrySummary};

use crate::config::ConfigError;
use crate::core::DecodeError;
use crate::ingest::PublishError;
use crate::sources::SourceError;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Terminal error of a batch run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("failed to decode record {record}: {source}")]
    Decode {
        record: u64,
        #[source]
        source: DecodeError,
    },

    #[error("merge failed: {0}")]
    Merge(#[source] PublishError),

    #[error("pipeline task panicked: {0}")]
    TaskPanicked(String),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Progress counters shared by the pipeline stages.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    subgraphs_read: AtomicU64,
    triples_fanned_out: AtomicU64,
    triples_merged: AtomicU64,
}

impl PipelineCounters {
    pub fn subgraphs_read(&self) -> u64 {
        self.subgraphs_read.load(Ordering::Relaxed)
    }

    pub fn triples_fanned_out(&self) -> u64 {
        self.triples_fanned_out.load(Ordering::Relaxed)
    }

    pub fn triples_merged(&self) -> u64 {
        self.triples_merged.load(Ordering::Relaxed)
    }

    fn record_subgraph(&self) {
        self.subgraphs_read.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fanned_out(&self) {
        self.triples_fanned_out.fetch_add(1, Ordering::Relaxed);
    }

    fn record_merged(&self) -> u64 {
        self.triples_merged.fetch_add(1, Ordering::Relaxed) + 1
    }
}
