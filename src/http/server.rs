//! HTTP ingest server
//!
//! Accepts one JSON subgraph per request and publishes it inline, so the
//! response reports whether the publish succeeded.

use crate::config::DEFAULT_MAX_RECORD_BYTES;
use crate::core::{Encoding, Subgraph};
use crate::ingest::{SubgraphIngester, SubgraphStats};
use crate::shutdown::{self, DrainPolicy, ListenerState, ServeError, ShutdownOutcome};
use axum::{
    async_trait,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, info_span, warn, Instrument, Level, Span};

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Shared application state
pub struct AppState {
    pub ingester: SubgraphIngester,
}

/// Custom error type for API errors
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

/// A request body holding one JSON-encoded subgraph.
///
/// Requires `Content-Type: application/json`; parameters such as a charset
/// are allowed.
pub struct SubgraphJson(pub Subgraph);

#[async_trait]
impl<S> FromRequest<S> for SubgraphJson
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_json_content_type(req.headers()) {
            return Err(ApiError::BadRequest("expected content type application/json".to_string()));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let subgraph = Encoding::Json
            .decode(&body)
            .map_err(|e| ApiError::BadRequest(format!("malformed subgraph: {e}")))?;
        Ok(Self(subgraph))
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Create the router with all routes
pub fn create_router(ingester: SubgraphIngester) -> Router {
    let state = Arc::new(AppState { ingester });

    Router::new()
        .route("/subgraph/ingest", post(ingest_subgraph))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(DEFAULT_MAX_RECORD_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(SuccessResponse { message: "megamind ingest is running".to_string() })
}

/// POST /subgraph/ingest - Publish one subgraph
async fn ingest_subgraph(
    State(state): State<Arc<AppState>>,
    SubgraphJson(subgraph): SubgraphJson,
) -> Result<Json<SubgraphStats>, ApiError> {
    let (stats, result) = state.ingester.ingest(&subgraph).await;
    result.map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(stats))
}

/// HTTP front end with a bounded graceful drain.
pub struct HttpServer {
    ingester: SubgraphIngester,
    drain: DrainPolicy,
    state: watch::Sender<ListenerState>,
    span: Span,
}

impl HttpServer {
    pub fn new(ingester: SubgraphIngester) -> Self {
        let (state, _) = watch::channel(ListenerState::Listening);
        Self {
            ingester,
            drain: DrainPolicy::Bounded(crate::config::DEFAULT_HTTP_DRAIN_TIMEOUT),
            state,
            span: info_span!("http"),
        }
    }

    pub fn with_drain_policy(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Serve until `token` is cancelled, then drain open connections.
    ///
    /// If the drain policy expires first, a warning is logged, the server task
    /// is aborted and [`ShutdownOutcome::TimedOut`] is returned. Connections
    /// still open at that point are abandoned; they end with the runtime.
    pub async fn serve(&self, listener: TcpListener, token: CancellationToken) -> Result<ShutdownOutcome, ServeError> {
        let span = self.span.clone();
        self.serve_inner(listener, token).instrument(span).await
    }

    async fn serve_inner(&self, listener: TcpListener, token: CancellationToken) -> Result<ShutdownOutcome, ServeError> {
        let addr = listener.local_addr()?;
        let app = create_router(self.ingester.clone());

        self.state.send_replace(ListenerState::Listening);
        info!(addr = %addr, "http server listening");

        let mut server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(token.clone().cancelled_owned())
                .into_future()
                .in_current_span(),
        );

        tokio::select! {
            biased;
            () = token.cancelled() => {}
            joined = &mut server => {
                self.state.send_replace(ListenerState::Stopped);
                joined??;
                return Ok(ShutdownOutcome::Drained);
            }
        }

        self.state.send_replace(ListenerState::Draining);
        info!(addr = %addr, "http server draining");

        let mut joined = None;
        let outcome = shutdown::drain(self.drain, async {
            joined = Some((&mut server).await);
        })
        .await;

        if outcome == ShutdownOutcome::TimedOut {
            warn!(addr = %addr, "http drain timed out, abandoning open connections");
            server.abort();
        }
        self.state.send_replace(ListenerState::Stopped);
        info!(addr = %addr, "http server stopped");

        if let Some(joined) = joined {
            joined??;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_json_content_type() {
        assert!(is_json_content_type(&headers("application/json")));
        assert!(is_json_content_type(&headers("application/json; charset=utf-8")));
        assert!(is_json_content_type(&headers("Application/JSON")));
        assert!(!is_json_content_type(&headers("text/plain")));
        assert!(!is_json_content_type(&headers("application/jsonl")));
        assert!(!is_json_content_type(&HeaderMap::new()));
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError::BadRequest("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::InternalError("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
