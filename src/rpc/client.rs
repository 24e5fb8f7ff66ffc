use super::server::codec;
use super::wire::{IngestReply, IngestResponse, IngestResult, Status};
use crate::config::DEFAULT_MAX_RECORD_BYTES;
use crate::core::Subgraph;
use crate::core::proto::SubgraphMessage;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use prost::Message;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Error, Debug)]
pub enum RpcClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed reply: {0}")]
    MalformedReply(#[from] prost::DecodeError),

    #[error("server closed the stream without a reply")]
    NoReply,

    #[error("server rejected the stream: {0}")]
    Rejected(Status),
}

/// Connects to an [`RpcServer`](super::RpcServer).
#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: String,
}

impl RpcClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Open a new ingest stream.
    pub async fn ingest(&self) -> Result<IngestStream, RpcClientError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| RpcClientError::Connect { addr: self.addr.clone(), source })?;
        Ok(IngestStream { framed: Framed::new(stream, codec(DEFAULT_MAX_RECORD_BYTES)) })
    }
}

/// Client half of one ingest stream.
pub struct IngestStream {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl IngestStream {
    pub async fn send(&mut self, subgraph: &Subgraph) -> Result<(), RpcClientError> {
        self.send_raw(SubgraphMessage::from(subgraph).encode_to_vec()).await
    }

    /// Send an arbitrary frame; the server expects a protobuf subgraph.
    pub async fn send_raw(&mut self, frame: Vec<u8>) -> Result<(), RpcClientError> {
        self.framed.send(Bytes::from(frame)).await?;
        Ok(())
    }

    /// Finish sending and wait for the server's single reply.
    pub async fn close_and_recv(&mut self) -> Result<IngestResponse, RpcClientError> {
        self.framed.get_mut().shutdown().await?;

        let reply = self.next_message().await?.ok_or(RpcClientError::NoReply)?;
        match reply.result {
            Some(IngestResult::Ok(response)) => Ok(response),
            Some(IngestResult::Error(status)) => Err(RpcClientError::Rejected(status)),
            None => Err(RpcClientError::NoReply),
        }
    }

    /// Next reply frame, `None` once the server closed the stream.
    pub async fn next_message(&mut self) -> Result<Option<IngestReply>, RpcClientError> {
        match self.framed.next().await {
            Some(frame) => Ok(Some(IngestReply::decode(frame?.freeze())?)),
            None => Ok(None),
        }
    }
}
