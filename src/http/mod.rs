//! HTTP front end
//!
//! - `POST /subgraph/ingest`: publish one JSON subgraph, answer with its stats
//! - `GET /health`: liveness probe

pub mod server;

pub use server::{create_router, ApiError, AppState, ErrorResponse, HttpServer, SubgraphJson, SuccessResponse};
