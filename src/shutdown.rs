//! Signal handling and graceful drain support
//!
//! Both front ends share the same shutdown capability: a cancellation token
//! tells the listener to stop accepting, and a [`DrainPolicy`] bounds how long
//! in-flight work may take to finish afterwards. The RPC front end defaults to
//! an unbounded drain and the HTTP front end to one minute.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Draining,
    Stopped,
}

/// Upper bound on the graceful drain of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Wait for every in-flight connection, however long it takes
    Unbounded,
    /// Give up after the duration and return control anyway
    Bounded(Duration),
}

impl DrainPolicy {
    /// `None` or zero seconds means unbounded.
    pub fn from_secs(secs: Option<u64>) -> Self {
        match secs {
            Some(secs) if secs > 0 => DrainPolicy::Bounded(Duration::from_secs(secs)),
            _ => DrainPolicy::Unbounded,
        }
    }
}

/// How a listener's drain finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight connection completed
    Drained,
    /// The drain bound expired with connections still open
    TimedOut,
}

/// The listen address could not be bound
#[derive(Error, Debug)]
#[error("failed to listen on {addr}: {source}")]
pub struct ListenError {
    pub addr: String,
    #[source]
    pub source: std::io::Error,
}

/// The listener failed after it started serving
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Bind a TCP listener, mapping failure to a [`ListenError`].
pub async fn bind(addr: &str) -> Result<TcpListener, ListenError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenError { addr: addr.to_string(), source })
}

/// Wait for `drained` to finish, honoring the policy.
pub async fn drain<F>(policy: DrainPolicy, drained: F) -> ShutdownOutcome
where
    F: Future<Output = ()>,
{
    match policy {
        DrainPolicy::Unbounded => {
            drained.await;
            ShutdownOutcome::Drained
        }
        DrainPolicy::Bounded(limit) => match tokio::time::timeout(limit, drained).await {
            Ok(()) => ShutdownOutcome::Drained,
            Err(_) => ShutdownOutcome::TimedOut,
        },
    }
}

/// Wait for SIGINT or SIGTERM (Ctrl+C only on non-unix targets).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Cancel `token` when a shutdown signal arrives.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => token.cancel(),
            () = token.cancelled() => {}
        }
    })
}
