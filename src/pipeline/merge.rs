use super::{PipelineCounters, PipelineError};
use crate::core::Triple;
use crate::ingest::PublishError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, Instrument, Span};

/// Number of merged triples between two progress log lines
const PROGRESS_EVERY: u64 = 10_000;

/// Extension point receiving every triple drained from the triple channel.
#[async_trait]
pub trait Merger: Send + Sync + 'static {
    async fn merge(&self, triple: Triple) -> Result<(), PublishError>;
}

/// Default merger: traces each triple and accepts it.
#[derive(Debug, Clone, Default)]
pub struct LoggingMerger;

#[async_trait]
impl Merger for LoggingMerger {
    async fn merge(&self, triple: Triple) -> Result<(), PublishError> {
        trace!(
            subject_type = %triple.subject.kind,
            subject_tuid = %triple.subject.tuid,
            predicate = %triple.predicate.name,
            "merged triple"
        );
        Ok(())
    }
}

/// Drain the triple channel until it closes or the token is cancelled.
///
/// Triples still queued when cancellation wins are dropped; that is not an
/// error. A merger failure is.
pub async fn run(
    mut rx: mpsc::Receiver<Triple>,
    merger: Arc<dyn Merger>,
    token: CancellationToken,
    counters: Arc<PipelineCounters>,
    span: Span,
) -> Result<(), PipelineError> {
    async move {
        let result = drain(&mut rx, merger.as_ref(), &token, &counters).await;
        info!(num_of_triples = counters.triples_merged(), "merged subgraphs");
        result
    }
    .instrument(span)
    .await
}

async fn drain(
    rx: &mut mpsc::Receiver<Triple>,
    merger: &dyn Merger,
    token: &CancellationToken,
    counters: &PipelineCounters,
) -> Result<(), PipelineError> {
    loop {
        let triple = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            next = rx.recv() => match next {
                Some(triple) => triple,
                None => return Ok(()),
            },
        };

        tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            merged = merger.merge(triple) => merged.map_err(PipelineError::Merge)?,
        }

        let merged = counters.record_merged();
        if merged % PROGRESS_EVERY == 0 {
            debug!(num_of_triples = merged, "merging subgraphs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Object, Predicate, Subject};

    struct RejectingMerger;

    #[async_trait]
    impl Merger for RejectingMerger {
        async fn merge(&self, _: Triple) -> Result<(), PublishError> {
            Err(PublishError::Rejected("conflict".to_string()))
        }
    }

    fn triple(tuid: &str) -> Triple {
        Triple::new(Subject::new("Person", tuid), Predicate::new("name"), Object::string("Bob"))
    }

    #[tokio::test]
    async fn test_drains_until_channel_closes() {
        let (tx, rx) = mpsc::channel(8);
        let counters = Arc::new(PipelineCounters::default());
        for i in 0..3 {
            tx.send(triple(&i.to_string())).await.unwrap();
        }
        drop(tx);

        let result = run(rx, Arc::new(LoggingMerger), CancellationToken::new(), counters.clone(), Span::none()).await;

        assert!(result.is_ok());
        assert_eq!(counters.triples_merged(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_drops_queued_triples() {
        let (tx, rx) = mpsc::channel(8);
        let counters = Arc::new(PipelineCounters::default());
        tx.send(triple("1")).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = run(rx, Arc::new(LoggingMerger), token, counters.clone(), Span::none()).await;

        assert!(result.is_ok());
        assert_eq!(counters.triples_merged(), 0);
    }

    #[tokio::test]
    async fn test_merger_error_is_fatal() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(triple("1")).await.unwrap();

        let result = run(
            rx,
            Arc::new(RejectingMerger),
            CancellationToken::new(),
            Arc::new(PipelineCounters::default()),
            Span::none(),
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Merge(PublishError::Rejected(_)))));
    }
}
