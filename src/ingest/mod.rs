//! Streaming ingest core
//!
//! Every subgraph received by a network front end passes through
//! [`SubgraphIngester`], which derives its statistics and hands it to the
//! [`Publisher`] extension point. Request/response delivery publishes inline;
//! streamed delivery publishes on a tracked background task so a slow publish
//! never blocks the receive loop.

pub mod stats;

pub use stats::{count_distinct_subjects, DistinctSubjectMode, SubgraphStats};

use crate::core::Subgraph;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{error, info, Instrument, Span};

/// Failure of the publish or merge extension point
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Extension point receiving every ingested subgraph.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, subgraph: &Subgraph, stats: &SubgraphStats) -> Result<(), PublishError>;
}

/// Default publisher: records the publish in the log and succeeds.
#[derive(Debug, Clone, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(&self, _subgraph: &Subgraph, stats: &SubgraphStats) -> Result<(), PublishError> {
        info!(
            num_of_triples = stats.num_of_triples,
            num_of_distinct_subjects = stats.num_of_distinct_subjects,
            "publishing subgraph"
        );
        info!(
            num_of_triples = stats.num_of_triples,
            num_of_distinct_subjects = stats.num_of_distinct_subjects,
            "published subgraph"
        );
        Ok(())
    }
}

/// Validates, measures and publishes subgraphs for the network front ends.
#[derive(Clone)]
pub struct SubgraphIngester {
    publisher: Arc<dyn Publisher>,
    mode: DistinctSubjectMode,
    span: Span,
    detached: TaskTracker,
}

impl SubgraphIngester {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            mode: DistinctSubjectMode::default(),
            span: tracing::info_span!("ingest"),
            detached: TaskTracker::new(),
        }
    }

    pub fn with_mode(mut self, mode: DistinctSubjectMode) -> Self {
        self.mode = mode;
        self
    }

    /// Span every log event of this ingester is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn mode(&self) -> DistinctSubjectMode {
        self.mode
    }

    pub fn stats(&self, subgraph: &Subgraph) -> SubgraphStats {
        SubgraphStats::of(subgraph, self.mode)
    }

    fn received(&self, subgraph: &Subgraph) -> SubgraphStats {
        let stats = self.stats(subgraph);
        self.span.in_scope(|| {
            info!(
                num_of_triples = stats.num_of_triples,
                num_of_distinct_subjects = stats.num_of_distinct_subjects,
                "received subgraph"
            );
        });
        stats
    }

    /// Publish inline; the caller waits for the publish to finish.
    pub async fn ingest(&self, subgraph: &Subgraph) -> (SubgraphStats, Result<(), PublishError>) {
        let stats = self.received(subgraph);
        let result = self.publisher.publish(subgraph, &stats).instrument(self.span.clone()).await;
        if let Err(e) = &result {
            self.span.in_scope(|| {
                error!(
                    error = %e,
                    num_of_triples = stats.num_of_triples,
                    num_of_distinct_subjects = stats.num_of_distinct_subjects,
                    "unexpected error when publishing subgraph"
                );
            });
        }
        (stats, result)
    }

    /// Publish on a tracked background task. Failures are only logged.
    pub fn ingest_detached(&self, subgraph: Subgraph) -> SubgraphStats {
        let stats = self.received(&subgraph);
        let publisher = Arc::clone(&self.publisher);
        let task_stats = stats;
        self.detached.spawn(
            async move {
                if let Err(e) = publisher.publish(&subgraph, &task_stats).await {
                    error!(
                        error = %e,
                        num_of_triples = task_stats.num_of_triples,
                        num_of_distinct_subjects = task_stats.num_of_distinct_subjects,
                        "unexpected error when publishing subgraph"
                    );
                }
            }
            .instrument(self.span.clone()),
        );
        stats
    }

    /// Number of detached publishes still running.
    pub fn pending(&self) -> usize {
        self.detached.len()
    }

    /// Wait for every detached publish spawned so far.
    pub async fn drain(&self) {
        self.detached.close();
        self.detached.wait().await;
        self.detached.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Object, Predicate, Subject, Triple};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _: &Subgraph, _: &SubgraphStats) -> Result<(), PublishError> {
            Err(PublishError::Rejected("downstream unavailable".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingPublisher {
        published: AtomicUsize,
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn publish(&self, _: &Subgraph, _: &SubgraphStats) -> Result<(), PublishError> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bob() -> Subgraph {
        Subgraph::new(vec![Triple::new(
            Subject::new("Person", "1"),
            Predicate::new("name"),
            Object::string("Bob"),
        )])
    }

    #[tokio::test]
    async fn test_ingest_reports_stats() {
        let ingester = SubgraphIngester::new(Arc::new(LoggingPublisher));
        let (stats, result) = ingester.ingest(&bob()).await;

        assert!(result.is_ok());
        assert_eq!(stats.num_of_triples, 1);
        assert_eq!(stats.num_of_distinct_subjects, 1);
    }

    #[tokio::test]
    async fn test_ingest_surfaces_publish_error() {
        let ingester = SubgraphIngester::new(Arc::new(FailingPublisher));
        let (_, result) = ingester.ingest(&bob()).await;

        assert!(matches!(result, Err(PublishError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_detached_publish_does_not_block_and_drains() {
        let publisher = Arc::new(CountingPublisher::default());
        let ingester = SubgraphIngester::new(publisher.clone());

        for _ in 0..5 {
            ingester.ingest_detached(bob());
        }
        assert_eq!(publisher.published.load(Ordering::SeqCst), 0);

        ingester.drain().await;
        assert_eq!(publisher.published.load(Ordering::SeqCst), 5);
        assert_eq!(ingester.pending(), 0);
    }

    #[tokio::test]
    async fn test_detached_publish_error_is_swallowed() {
        let ingester = SubgraphIngester::new(Arc::new(FailingPublisher));
        let stats = ingester.ingest_detached(bob());

        assert_eq!(stats.num_of_triples, 1);
        ingester.drain().await;
    }
}
