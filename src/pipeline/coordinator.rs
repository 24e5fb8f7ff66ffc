//! Batch pipeline coordinator.
//!
//! Wires the record source, fan-out, merge stage and telemetry monitor into
//! two nested task groups and turns their joined result into exactly one
//! terminal state.

use super::fan_out::{FanOut, SourceInput};
use super::group::TaskGroup;
use super::merge::{self, Merger};
use super::telemetry::{TelemetryMonitor, TelemetrySummary};
use super::{PipelineCounters, PipelineError};
use crate::config::PipelineConfig;
use crate::sources::{RecordSource, SourceSpec};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled)
    }
}

/// Counters collected over one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub subgraphs_read: u64,
    pub triples_fanned_out: u64,
    pub triples_merged: u64,
    pub telemetry_samples: u64,
    pub peak_resident_bytes: Option<u64>,
    pub elapsed: Duration,
}

impl PipelineReport {
    #[allow(clippy::cast_precision_loss)]
    pub fn triples_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.triples_merged as f64 / secs
        } else {
            0.0
        }
    }
}

/// Terminal result of [`BatchPipeline::run`]
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(PipelineReport),
    Cancelled(PipelineReport),
    Failed { error: PipelineError, report: PipelineReport },
}

impl PipelineOutcome {
    pub fn state(&self) -> PipelineState {
        match self {
            PipelineOutcome::Completed(_) => PipelineState::Completed,
            PipelineOutcome::Cancelled(_) => PipelineState::Cancelled,
            PipelineOutcome::Failed { .. } => PipelineState::Failed,
        }
    }

    pub fn report(&self) -> &PipelineReport {
        match self {
            PipelineOutcome::Completed(report)
            | PipelineOutcome::Cancelled(report)
            | PipelineOutcome::Failed { report, .. } => report,
        }
    }

    /// Collapse into a `Result`; cancellation counts as an error.
    pub fn into_result(self) -> Result<PipelineReport, PipelineError> {
        match self {
            PipelineOutcome::Completed(report) => Ok(report),
            PipelineOutcome::Cancelled(_) => Err(PipelineError::Cancelled),
            PipelineOutcome::Failed { error, .. } => Err(error),
        }
    }
}

/// One batch ingestion run.
pub struct BatchPipeline {
    config: PipelineConfig,
    merger: Arc<dyn Merger>,
    source: Option<RecordSource>,
    span: Span,
    state: watch::Sender<PipelineState>,
}

impl BatchPipeline {
    pub fn new(config: PipelineConfig, merger: Arc<dyn Merger>) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self { config, merger, source: None, span: info_span!("pipeline"), state }
    }

    /// Read from an already opened source instead of `config.source`.
    pub fn with_source(mut self, source: RecordSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Watch the run's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Run to completion, failure or cancellation of `cancel`.
    pub async fn run(self, cancel: CancellationToken) -> PipelineOutcome {
        let started = Instant::now();
        let counters = Arc::new(PipelineCounters::default());

        if let Err(e) = self.config.validate() {
            return Self::report_outcome(
                &self.state,
                &self.span,
                Err(e.into()),
                &cancel,
                &counters,
                TelemetrySummary::default(),
                started,
            );
        }
        self.state.send_replace(PipelineState::Running);

        let input = match self.source {
            Some(source) => SourceInput::Ready(source),
            None => SourceInput::Open {
                spec: SourceSpec::parse(&self.config.source),
                max_record_bytes: self.config.max_record_bytes,
            },
        };
        let fan_out = FanOut {
            encoding: self.config.encoding,
            max_in_flight: self.config.max_in_flight.filter(|n| *n > 0),
        };

        let inner_token = cancel.child_token();
        let outer_token = inner_token.child_token();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let mut inner = TaskGroup::new("inner", inner_token.clone());
        inner.spawn(fan_out.run(input, tx, inner_token.clone(), Arc::clone(&counters), self.span.clone()));
        inner.spawn(merge::run(
            rx,
            Arc::clone(&self.merger),
            inner_token,
            Arc::clone(&counters),
            self.span.clone(),
        ));

        let (summary_tx, summary_rx) = oneshot::channel();
        let monitor = TelemetryMonitor::new(self.config.telemetry_interval).with_span(self.span.clone());
        let mut outer = TaskGroup::new("outer", outer_token.clone());
        outer.spawn(inner.wait());
        outer.spawn(async move {
            let summary = monitor.run(outer_token).await;
            let _ = summary_tx.send(summary);
            Ok(())
        });

        let result = outer.wait().await;
        let telemetry = summary_rx.await.unwrap_or_default();
        Self::report_outcome(
            &self.state,
            &self.span,
            result,
            &cancel,
            &counters,
            telemetry,
            started,
        )
    }

    fn report_outcome(
        state: &watch::Sender<PipelineState>,
        span: &Span,
        result: Result<(), PipelineError>,
        cancel: &CancellationToken,
        counters: &PipelineCounters,
        telemetry: TelemetrySummary,
        started: Instant,
    ) -> PipelineOutcome {
        let report = PipelineReport {
            subgraphs_read: counters.subgraphs_read(),
            triples_fanned_out: counters.triples_fanned_out(),
            triples_merged: counters.triples_merged(),
            telemetry_samples: telemetry.samples,
            peak_resident_bytes: telemetry.peak_resident_bytes,
            elapsed: started.elapsed(),
        };

        let outcome = match result {
            Err(error) => PipelineOutcome::Failed { error, report },
            Ok(()) if cancel.is_cancelled() => PipelineOutcome::Cancelled(report),
            Ok(()) => PipelineOutcome::Completed(report),
        };

        span.in_scope(|| {
            let report = outcome.report();
            match &outcome {
                PipelineOutcome::Completed(_) => info!(
                    num_of_subgraphs = report.subgraphs_read,
                    num_of_triples = report.triples_merged,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "pipeline completed"
                ),
                PipelineOutcome::Cancelled(_) => warn!(
                    num_of_subgraphs = report.subgraphs_read,
                    num_of_triples = report.triples_merged,
                    "pipeline cancelled"
                ),
                PipelineOutcome::Failed { error, .. } => error!(error = %error, "pipeline failed"),
            }
        });

        state.send_replace(outcome.state());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Encoding, Framing};

    #[tokio::test]
    async fn test_empty_source_completes() {
        let source = RecordSource::from_reader("empty", &b""[..], Framing::Lines);
        let pipeline = BatchPipeline::new(PipelineConfig::default(), Arc::new(merge::LoggingMerger))
            .with_source(source);
        let mut state = pipeline.subscribe();
        assert_eq!(*state.borrow_and_update(), PipelineState::Idle);

        let outcome = pipeline.run(CancellationToken::new()).await;

        assert_eq!(outcome.state(), PipelineState::Completed);
        assert_eq!(outcome.report().subgraphs_read, 0);
        assert_eq!(*state.borrow_and_update(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_running() {
        let config = PipelineConfig { channel_capacity: 0, ..PipelineConfig::new("-", Encoding::Json) };
        let outcome = BatchPipeline::new(config, Arc::new(merge::LoggingMerger))
            .run(CancellationToken::new())
            .await;

        assert!(matches!(outcome, PipelineOutcome::Failed { error: PipelineError::Config(_), .. }));
    }

    #[test]
    fn test_cancelled_outcome_into_result() {
        let outcome = PipelineOutcome::Cancelled(PipelineReport::default());
        assert!(outcome.state().is_terminal());
        assert!(matches!(outcome.into_result(), Err(PipelineError::Cancelled)));
    }
}
