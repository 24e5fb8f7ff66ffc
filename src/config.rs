//! Configuration structures and utilities
//!
//! Every struct here has a `Default` matching the documented defaults; the
//! binaries map their command-line flags and `MEGAMIND_*` environment
//! variables onto these.

use crate::core::Encoding;
use crate::ingest::DistinctSubjectMode;
use crate::shutdown::DrainPolicy;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RPC_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8081";
pub const DEFAULT_HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;
pub const DEFAULT_MAX_RECORD_BYTES: usize = 64 * 1024 * 1024;

/// Errors raised while validating configuration at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported encoding '{0}' (expected 'json' or 'proto')")]
    UnknownEncoding(String),

    #[error("unsupported log format '{0}' (expected 'text' or 'json')")]
    UnknownLogFormat(String),

    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Configuration for one batch pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// File path, or `-` for standard input
    pub source: String,
    pub encoding: Encoding,
    /// Capacity of the shared triple channel
    pub channel_capacity: usize,
    /// Upper bound on concurrently running per-record fan-out tasks.
    /// `None` spawns one task per record without limit.
    pub max_in_flight: Option<usize>,
    pub telemetry_interval: Duration,
    pub max_record_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: "-".to_string(),
            encoding: Encoding::Json,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_in_flight: Some(DEFAULT_MAX_IN_FLIGHT),
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl PipelineConfig {
    pub fn new(source: impl Into<String>, encoding: Encoding) -> Self {
        Self { source: source.into(), encoding, ..Default::default() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero { field: "channel_capacity" });
        }
        if self.telemetry_interval.is_zero() {
            return Err(ConfigError::Zero { field: "telemetry_interval" });
        }
        if self.max_record_bytes == 0 {
            return Err(ConfigError::Zero { field: "max_record_bytes" });
        }
        Ok(())
    }
}

/// Configuration for the streaming front ends
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub rpc_addr: String,
    pub http_addr: String,
    /// Drain bound for the RPC front end; unbounded by default
    pub rpc_drain: DrainPolicy,
    /// Drain bound for the HTTP front end; one minute by default
    pub http_drain: DrainPolicy,
    pub distinct_subjects: DistinctSubjectMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_addr: DEFAULT_RPC_ADDR.to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            rpc_drain: DrainPolicy::Unbounded,
            http_drain: DrainPolicy::Bounded(DEFAULT_HTTP_DRAIN_TIMEOUT),
            distinct_subjects: DistinctSubjectMode::Reference,
        }
    }
}
