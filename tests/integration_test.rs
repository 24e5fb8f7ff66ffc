//! Integration tests for Megamind
//!
//! These tests run both front ends in one process, sharing a single ingest
//! core and cancellation token, the way `ingest_server all` does.

use async_trait::async_trait;
use megamind::core::{Encoding, Object, Predicate, Subgraph, Subject, Triple};
use megamind::http::HttpServer;
use megamind::ingest::{PublishError, Publisher, SubgraphIngester, SubgraphStats};
use megamind::rpc::{RpcClient, RpcServer};
use megamind::shutdown::{self, ShutdownOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingPublisher {
    published: AtomicUsize,
}

#[async_trait]
impl Publisher for CountingPublisher {
    async fn publish(&self, _: &Subgraph, _: &SubgraphStats) -> Result<(), PublishError> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn alice_knows_bob() -> Subgraph {
    Subgraph::new(vec![
        Triple::new(Subject::new("Person", "1"), Predicate::new("name"), Object::string("Alice")),
        Triple::new(Subject::new("Person", "1"), Predicate::new("knows"), Object::subject("Person", "2")),
    ])
}

#[tokio::test]
async fn test_both_front_ends_share_ingest_core() {
    let publisher = Arc::new(CountingPublisher::default());
    let ingester = SubgraphIngester::new(publisher.clone());
    let token = CancellationToken::new();

    let rpc_listener = shutdown::bind("127.0.0.1:0").await.unwrap();
    let http_listener = shutdown::bind("127.0.0.1:0").await.unwrap();
    let rpc_addr = rpc_listener.local_addr().unwrap().to_string();
    let http_url = format!("http://{}/subgraph/ingest", http_listener.local_addr().unwrap());

    let rpc = RpcServer::new(ingester.clone());
    let http = HttpServer::new(ingester);
    let rpc_token = token.clone();
    let http_token = token.clone();
    let rpc_handle = tokio::spawn(async move { rpc.serve(rpc_listener, rpc_token).await });
    let http_handle = tokio::spawn(async move { http.serve(http_listener, http_token).await });

    let mut stream = RpcClient::new(rpc_addr).ingest().await.unwrap();
    stream.send(&alice_knows_bob()).await.unwrap();
    stream.send(&alice_knows_bob()).await.unwrap();
    stream.close_and_recv().await.unwrap();

    let response = reqwest::Client::new()
        .post(http_url.as_str())
        .header("content-type", "application/json")
        .body(Encoding::Json.encode(&alice_knows_bob()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let stats: serde_json::Value = response.json().await.unwrap();
    assert_eq!(stats["num_of_triples"], 2);
    assert_eq!(stats["num_of_distinct_subjects"], 1);

    token.cancel();
    let rpc_outcome = tokio::time::timeout(Duration::from_secs(5), rpc_handle).await.unwrap().unwrap();
    let http_outcome = tokio::time::timeout(Duration::from_secs(5), http_handle).await.unwrap().unwrap();
    assert_eq!(rpc_outcome.unwrap(), ShutdownOutcome::Drained);
    assert_eq!(http_outcome.unwrap(), ShutdownOutcome::Drained);

    assert_eq!(publisher.published.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_bind_conflict_is_listen_error() {
    let first = shutdown::bind("127.0.0.1:0").await.unwrap();
    let addr = first.local_addr().unwrap().to_string();

    let err = shutdown::bind(&addr).await.unwrap_err();
    assert_eq!(err.addr, addr);
    assert!(err.to_string().starts_with(&format!("failed to listen on {}", addr)));
}
