//! Reply messages of the streaming ingest RPC.
//!
//! Requests are plain `SubgraphMessage` frames; the server answers each stream
//! with exactly one [`IngestReply`].

/// Status code for a malformed request message
pub const CODE_INVALID_ARGUMENT: i32 = 3;
/// Status code for any other server-side failure
pub const CODE_INTERNAL: i32 = 13;

/// Empty success payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestResponse {}

/// Terminal error of a stream
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestReply {
    #[prost(oneof = "IngestResult", tags = "1,2")]
    pub result: Option<IngestResult>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum IngestResult {
    #[prost(message, tag = "1")]
    Ok(IngestResponse),
    #[prost(message, tag = "2")]
    Error(Status),
}

impl IngestReply {
    pub fn ok() -> Self {
        Self { result: Some(IngestResult::Ok(IngestResponse {})) }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self { result: Some(IngestResult::Error(Status { code, message: message.into() })) }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}
