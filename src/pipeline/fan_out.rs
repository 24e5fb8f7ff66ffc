use super::{PipelineCounters, PipelineError};
use crate::core::{Encoding, Subgraph, Triple};
use crate::sources::{RecordSource, SourceSpec};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, Instrument, Span};

/// A source still to be opened, or one the caller already opened.
pub enum SourceInput {
    Open { spec: SourceSpec, max_record_bytes: usize },
    Ready(RecordSource),
}

impl SourceInput {
    async fn open(self, encoding: Encoding) -> Result<RecordSource, PipelineError> {
        match self {
            SourceInput::Ready(source) => Ok(source),
            SourceInput::Open { spec, max_record_bytes } => {
                info!(source = %spec, "opening source");
                let source = RecordSource::open(&spec, encoding.framing())
                    .await?
                    .with_max_record_bytes(max_record_bytes);
                info!(source = %spec, "opened source");
                Ok(source)
            }
        }
    }
}

/// Settings of the reading half of the pipeline
pub struct FanOut {
    pub encoding: Encoding,
    /// `None` leaves the number of concurrent per-record tasks unbounded
    pub max_in_flight: Option<usize>,
}

impl FanOut {
    /// Read, decode and fan out every record of `input`.
    ///
    /// Each decoded subgraph gets its own tracked task that pushes the
    /// triples in order onto `tx`. The reader waits for all of them before
    /// returning, so the channel closes only once the last sender is gone.
    pub async fn run(
        self,
        input: SourceInput,
        tx: mpsc::Sender<Triple>,
        token: CancellationToken,
        counters: Arc<PipelineCounters>,
        span: Span,
    ) -> Result<(), PipelineError> {
        async move {
            let source = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(()),
                opened = input.open(self.encoding) => opened?,
            };

            let tracker = TaskTracker::new();
            let result = self.read_all(source, &tx, &tracker, &token, &counters).await;
            if result.is_err() {
                token.cancel();
            }
            tracker.close();
            tracker.wait().await;
            drop(tx);
            result
        }
        .instrument(span)
        .await
    }

    async fn read_all(
        &self,
        mut source: RecordSource,
        tx: &mpsc::Sender<Triple>,
        tracker: &TaskTracker,
        token: &CancellationToken,
        counters: &Arc<PipelineCounters>,
    ) -> Result<(), PipelineError> {
        let limiter = self.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));

        info!(source = source.name(), encoding = %self.encoding, "reading subgraphs from source");
        loop {
            let record = tokio::select! {
                biased;
                () = token.cancelled() => break,
                next = source.next_record() => match next? {
                    Some(record) => record,
                    None => break,
                },
            };

            let subgraph = self
                .encoding
                .decode(&record)
                .map_err(|source_err| PipelineError::Decode {
                    record: source.records_read(),
                    source: source_err,
                })?;
            counters.record_subgraph();

            let permit = match &limiter {
                Some(limiter) => {
                    let acquired = tokio::select! {
                        biased;
                        () = token.cancelled() => break,
                        permit = Arc::clone(limiter).acquire_owned() => permit,
                    };
                    // The semaphore is never closed.
                    acquired.ok()
                }
                None => None,
            };

            tracker.spawn(
                send_triples(subgraph, tx.clone(), token.clone(), permit, Arc::clone(counters))
                    .in_current_span(),
            );
        }
        info!(
            source = source.name(),
            num_of_subgraphs = counters.subgraphs_read(),
            "read subgraphs from source"
        );
        Ok(())
    }
}

async fn send_triples(
    subgraph: Subgraph,
    tx: mpsc::Sender<Triple>,
    token: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
    counters: Arc<PipelineCounters>,
) {
    for triple in subgraph.triples {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            sent = tx.send(triple) => {
                if sent.is_err() {
                    debug!("triple channel closed, abandoning subgraph");
                    return;
                }
            }
        }
        counters.record_fanned_out();
    }
}
