//! Client-streaming ingest server.
//!
//! Each connection is one stream: a sequence of length-prefixed protobuf
//! subgraphs, ended by the client half-closing its side. Every subgraph is
//! handed to the ingest core as a detached publish, and the stream is answered
//! with a single [`IngestReply`] before the connection is closed.

use super::wire::{IngestReply, IngestResult, CODE_INTERNAL, CODE_INVALID_ARGUMENT};
use crate::config::DEFAULT_MAX_RECORD_BYTES;
use crate::core::Encoding;
use crate::ingest::SubgraphIngester;
use crate::shutdown::{self, DrainPolicy, ListenerState, ServeError, ShutdownOutcome};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use prost::Message;
use std::io;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument, Span};

const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);
/// How long a rejected stream may keep sending before the connection is dropped
const REJECTED_STREAM_LINGER: Duration = Duration::from_secs(5);

pub(crate) fn codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(max_frame_bytes).new_codec()
}

pub struct RpcServer {
    ingester: SubgraphIngester,
    drain: DrainPolicy,
    max_frame_bytes: usize,
    state: watch::Sender<ListenerState>,
    span: Span,
}

impl RpcServer {
    pub fn new(ingester: SubgraphIngester) -> Self {
        let (state, _) = watch::channel(ListenerState::Listening);
        Self {
            ingester,
            drain: DrainPolicy::Unbounded,
            max_frame_bytes: DEFAULT_MAX_RECORD_BYTES,
            state,
            span: info_span!("rpc"),
        }
    }

    pub fn with_drain_policy(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Accept streams until `token` is cancelled, then drain.
    ///
    /// Draining waits for every open stream and every detached publish they
    /// started. When the drain policy expires first, the remaining streams are
    /// aborted and [`ShutdownOutcome::TimedOut`] is returned.
    pub async fn serve(&self, listener: TcpListener, token: CancellationToken) -> Result<ShutdownOutcome, ServeError> {
        let span = self.span.clone();
        self.serve_inner(listener, token).instrument(span).await
    }

    async fn serve_inner(&self, listener: TcpListener, token: CancellationToken) -> Result<ShutdownOutcome, ServeError> {
        let addr = listener.local_addr()?;
        self.state.send_replace(ListenerState::Listening);
        info!(addr = %addr, "rpc server listening");

        let connections = TaskTracker::new();
        let abort = CancellationToken::new();

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        if recover_from_accept_error(&e, &token).await {
                            continue;
                        }
                        break;
                    }
                },
            };

            let conn = Connection {
                ingester: self.ingester.clone(),
                abort: abort.clone(),
                max_frame_bytes: self.max_frame_bytes,
            };
            connections.spawn(conn.handle(stream).instrument(info_span!("stream", peer = %peer)));
        }
        drop(listener);

        self.state.send_replace(ListenerState::Draining);
        info!(addr = %addr, open_streams = connections.len(), "rpc server draining");
        connections.close();
        let outcome = shutdown::drain(self.drain, async {
            connections.wait().await;
            self.ingester.drain().await;
        })
        .await;
        if outcome == ShutdownOutcome::TimedOut {
            warn!(addr = %addr, open_streams = connections.len(), "rpc drain timed out, aborting open streams");
            abort.cancel();
        }
        self.state.send_replace(ListenerState::Stopped);
        info!(addr = %addr, "rpc server stopped");

        Ok(outcome)
    }
}

/// Accept errors that only concern the one connection.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

/// Keep the listener alive after a failed accept.
///
/// Errors that only concern one connection are skipped right away. Anything
/// else (running out of file descriptors, for one) backs off before the next
/// accept. Returns `false` if `token` is cancelled while backing off.
async fn recover_from_accept_error(e: &io::Error, token: &CancellationToken) -> bool {
    if is_connection_error(e) {
        debug!(error = %e, "connection failed during accept");
        return true;
    }

    warn!(error = %e, backoff_ms = ACCEPT_BACKOFF.as_millis() as u64, "failed to accept connection, retrying");
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

struct Connection {
    ingester: SubgraphIngester,
    abort: CancellationToken,
    max_frame_bytes: usize,
}

impl Connection {
    async fn handle(self, stream: TcpStream) {
        let mut framed = Framed::new(stream, codec(self.max_frame_bytes));
        let mut received: u64 = 0;

        let reply = loop {
            let frame = tokio::select! {
                biased;
                () = self.abort.cancelled() => {
                    debug!(num_of_subgraphs = received, "stream aborted");
                    return;
                }
                frame = framed.next() => frame,
            };

            match frame {
                None => break IngestReply::ok(),
                Some(Err(e)) => {
                    warn!(error = %e, "failed to receive subgraph");
                    let code = if e.kind() == io::ErrorKind::InvalidData { CODE_INVALID_ARGUMENT } else { CODE_INTERNAL };
                    break IngestReply::error(code, e.to_string());
                }
                Some(Ok(frame)) => match Encoding::Proto.decode(&frame) {
                    Ok(subgraph) => {
                        self.ingester.ingest_detached(subgraph);
                        received += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "received malformed subgraph");
                        break IngestReply::error(CODE_INVALID_ARGUMENT, format!("malformed subgraph: {e}"));
                    }
                },
            }
        };

        let failed = matches!(reply.result, Some(IngestResult::Error(_)));
        if let Err(e) = framed.send(Bytes::from(reply.encode_to_vec())).await {
            debug!(error = %e, "failed to send reply");
            return;
        }

        // Discard whatever the client still sends after a rejection so the
        // reply is not lost to a connection reset. The codec stops yielding
        // after an error, so this reads the raw socket.
        if failed {
            let mut socket = framed.into_inner();
            let discard = tokio::time::timeout(REJECTED_STREAM_LINGER, async {
                tokio::io::copy(&mut socket, &mut tokio::io::sink()).await
            });
            tokio::select! {
                biased;
                () = self.abort.cancelled() => {}
                _ = discard => {}
            }
        }
        debug!(num_of_subgraphs = received, "stream finished");
    }
}
