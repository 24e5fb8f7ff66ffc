//! Cancellation-linked task group.
//!
//! Every task in a group shares one [`CancellationToken`]. The first task to
//! fail cancels the token, so its siblings unwind, and its error becomes the
//! group's result. Once all tasks have finished the token is cancelled as well,
//! which lets anything watching the group know it is done.

use super::PipelineError;
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct TaskGroup {
    name: &'static str,
    token: CancellationToken,
    tasks: JoinSet<Result<(), PipelineError>>,
}

impl TaskGroup {
    pub fn new(name: &'static str, token: CancellationToken) -> Self {
        Self { name, token, tasks: JoinSet::new() }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Join every task and return the first error, if any.
    pub async fn wait(mut self) -> Result<(), PipelineError> {
        let mut first: Option<PipelineError> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(PipelineError::TaskPanicked(e.to_string())));
            if let Err(e) = result {
                if first.is_none() {
                    debug!(group = self.name, error = %e, "task failed, cancelling group");
                    self.token.cancel();
                    first = Some(e);
                }
            }
        }
        self.token.cancel();
        first.map_or(Ok(()), Err)
    }
}
