//! RPC Front End Integration Tests
//!
//! These tests run the streaming ingest server on an ephemeral port and drive
//! it with the bundled client:
//! - a stream that sends and half-closes gets one success reply, then EOF
//! - malformed frames end only their own stream with INVALID_ARGUMENT
//! - cancellation drains open streams and stops the listener

use async_trait::async_trait;
use megamind::core::{Object, Predicate, Subgraph, Subject, Triple};
use megamind::ingest::{LoggingPublisher, PublishError, Publisher, SubgraphIngester, SubgraphStats};
use megamind::rpc::{
    IngestReply, IngestResult, RpcClient, RpcClientError, RpcServer, CODE_INTERNAL, CODE_INVALID_ARGUMENT,
};
use megamind::shutdown::{DrainPolicy, ListenerState, ShutdownOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingPublisher {
    published: AtomicUsize,
    triples: AtomicUsize,
}

#[async_trait]
impl Publisher for CountingPublisher {
    async fn publish(&self, _subgraph: &Subgraph, stats: &SubgraphStats) -> Result<(), PublishError> {
        self.published.fetch_add(1, Ordering::SeqCst);
        self.triples.fetch_add(stats.num_of_triples, Ordering::SeqCst);
        Ok(())
    }
}

/// Signals every publish, so a test knows its stream was accepted.
struct NotifyingPublisher {
    published: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl Publisher for NotifyingPublisher {
    async fn publish(&self, _subgraph: &Subgraph, _stats: &SubgraphStats) -> Result<(), PublishError> {
        let _ = self.published.send(());
        Ok(())
    }
}

fn notifying_ingester() -> (SubgraphIngester, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SubgraphIngester::new(Arc::new(NotifyingPublisher { published: tx })), rx)
}

fn bob() -> Subgraph {
    Subgraph::new(vec![Triple::new(
        Subject::new("Person", "1"),
        Predicate::new("name"),
        Object::string("Bob"),
    )])
}

struct TestServer {
    addr: String,
    token: CancellationToken,
    handle: JoinHandle<Result<ShutdownOutcome, megamind::shutdown::ServeError>>,
}

async fn start_server(server: RpcServer) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let token = CancellationToken::new();
    let serve_token = token.clone();
    let handle = tokio::spawn(async move { server.serve(listener, serve_token).await });
    TestServer { addr, token, handle }
}

#[tokio::test]
async fn test_stream_then_close_gets_reply_and_eof() {
    let publisher = Arc::new(CountingPublisher::default());
    let server = start_server(RpcServer::new(SubgraphIngester::new(publisher.clone()))).await;

    let client = RpcClient::new(server.addr.clone());
    let mut stream = client.ingest().await.unwrap();
    stream.send(&bob()).await.unwrap();
    stream.close_and_recv().await.unwrap();

    // The reply is the last message of the stream.
    assert!(stream.next_message().await.unwrap().is_none());

    server.token.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), server.handle).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap(), ShutdownOutcome::Drained);

    // Draining waits for detached publishes.
    assert_eq!(publisher.published.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.triples.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_stream_succeeds() {
    let server = start_server(RpcServer::new(SubgraphIngester::new(Arc::new(LoggingPublisher)))).await;

    let mut stream = RpcClient::new(server.addr.clone()).ingest().await.unwrap();
    stream.close_and_recv().await.unwrap();

    server.token.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_frame_ends_only_its_stream() {
    let publisher = Arc::new(CountingPublisher::default());
    let server = start_server(RpcServer::new(SubgraphIngester::new(publisher.clone()))).await;
    let client = RpcClient::new(server.addr.clone());

    let mut bad = client.ingest().await.unwrap();
    bad.send_raw(vec![0xFF, 0xFF, 0xFF]).await.unwrap();
    match bad.close_and_recv().await {
        Err(RpcClientError::Rejected(status)) => assert_eq!(status.code, CODE_INVALID_ARGUMENT),
        other => panic!("expected an INVALID_ARGUMENT status, got {:?}", other.map(|_| ())),
    }

    // The server keeps serving other streams.
    let mut good = client.ingest().await.unwrap();
    good.send(&bob()).await.unwrap();
    good.send(&bob()).await.unwrap();
    good.close_and_recv().await.unwrap();

    server.token.cancel();
    server.handle.await.unwrap().unwrap();
    assert_eq!(publisher.published.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_truncated_frame_ends_stream_with_internal_status() {
    let server = start_server(RpcServer::new(SubgraphIngester::new(Arc::new(LoggingPublisher)))).await;

    // The header announces 100 bytes but only 3 arrive before the half-close.
    let mut socket = TcpStream::connect(&server.addr).await.unwrap();
    socket.write_all(&[0, 0, 0, 100, 1, 2, 3]).await.unwrap();
    socket.shutdown().await.unwrap();

    let mut raw = Vec::new();
    socket.read_to_end(&mut raw).await.unwrap();
    let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    assert_eq!(raw.len(), 4 + len);

    match IngestReply::decode(&raw[4..]).unwrap().result {
        Some(IngestResult::Error(status)) => assert_eq!(status.code, CODE_INTERNAL),
        other => panic!("expected an INTERNAL status, got {:?}", other),
    }

    server.token.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_frame_is_invalid_argument() {
    let publisher = Arc::new(CountingPublisher::default());
    let server = RpcServer::new(SubgraphIngester::new(publisher.clone())).with_max_frame_bytes(16);
    let server = start_server(server).await;

    let mut stream = RpcClient::new(server.addr.clone()).ingest().await.unwrap();
    stream.send_raw(vec![0u8; 64]).await.unwrap();
    match stream.close_and_recv().await {
        Err(RpcClientError::Rejected(status)) => assert_eq!(status.code, CODE_INVALID_ARGUMENT),
        other => panic!("expected an INVALID_ARGUMENT status, got {:?}", other.map(|_| ())),
    }

    server.token.cancel();
    server.handle.await.unwrap().unwrap();
    assert_eq!(publisher.published.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_subgraph_missing_object_is_rejected() {
    use megamind::core::proto::{PredicateMessage, SubgraphMessage, SubjectMessage, TripleMessage};

    let server = start_server(RpcServer::new(SubgraphIngester::new(Arc::new(LoggingPublisher)))).await;
    let incomplete = SubgraphMessage {
        triples: vec![TripleMessage {
            subject: Some(SubjectMessage { kind: "Person".to_string(), tuid: "1".to_string() }),
            predicate: Some(PredicateMessage { name: "name".to_string() }),
            object: None,
        }],
    };

    let mut stream = RpcClient::new(server.addr.clone()).ingest().await.unwrap();
    stream.send_raw(incomplete.encode_to_vec()).await.unwrap();
    let reply = stream.close_and_recv().await;
    assert!(matches!(reply, Err(RpcClientError::Rejected(status)) if status.code == CODE_INVALID_ARGUMENT));

    server.token.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_open_stream() {
    let (ingester, mut published) = notifying_ingester();
    let server = RpcServer::new(ingester);
    let mut state = server.subscribe();
    let server = start_server(server).await;

    let mut stream = RpcClient::new(server.addr.clone()).ingest().await.unwrap();
    stream.send(&bob()).await.unwrap();
    published.recv().await.unwrap();

    server.token.cancel();
    state.wait_for(|s| *s == ListenerState::Draining).await.unwrap();
    assert!(!server.handle.is_finished());

    // The open stream still completes normally during the drain.
    stream.send(&bob()).await.unwrap();
    stream.close_and_recv().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), server.handle).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap(), ShutdownOutcome::Drained);
    assert_eq!(*state.borrow(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_bounded_drain_times_out() {
    let (ingester, mut published) = notifying_ingester();
    let server = RpcServer::new(ingester).with_drain_policy(DrainPolicy::Bounded(Duration::from_millis(100)));
    let server = start_server(server).await;

    let mut stream = RpcClient::new(server.addr.clone()).ingest().await.unwrap();
    stream.send(&bob()).await.unwrap();
    published.recv().await.unwrap();

    server.token.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), server.handle).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap(), ShutdownOutcome::TimedOut);

    // The aborted stream is closed without a reply.
    let next = stream.next_message().await;
    assert!(matches!(next, Ok(None) | Err(_)));
}
