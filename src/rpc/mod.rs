//! Streaming RPC front end
//!
//! A client-streaming ingest method over TCP. Frames are 4-byte big-endian
//! length-prefixed; requests carry protobuf subgraphs and the single reply is
//! an [`IngestReply`].

pub mod client;
pub mod server;
pub mod wire;

pub use client::{IngestStream, RpcClient, RpcClientError};
pub use server::RpcServer;
pub use wire::{IngestReply, IngestResponse, IngestResult, Status, CODE_INTERNAL, CODE_INVALID_ARGUMENT};
