//! # Megamind
//!
//! Megamind ingests graph-structured data: subgraphs made of
//! subject–predicate–object triples.
//!
//! Two ingestion paths share the same data model:
//!
//! - a **streaming** path, where remote callers push subgraphs over an RPC
//!   stream or an HTTP endpoint and each one is handed to the ingest core;
//! - a **batch** path, where a file (or standard input) holding one encoded
//!   subgraph per record is decoded, fanned out triple by triple onto a shared
//!   channel and merged back.
//!
//! Both paths are driven by a single cancellation token per run or per server
//! lifetime, and every blocking point selects against it.
//!
//! ## Example
//!
//! ```rust
//! use megamind::core::{Encoding, Subgraph};
//! use megamind::ingest::{count_distinct_subjects, DistinctSubjectMode};
//!
//! fn example() -> megamind::Result<()> {
//!     let raw = br#"{"triples":[{"subject":{"type":"Person","tuid":"1"},"predicate":{"name":"name"},"object":{"string":"Bob"}}]}"#;
//!     let subgraph: Subgraph = Encoding::Json.decode(raw)?;
//!     assert_eq!(subgraph.len(), 1);
//!     assert_eq!(count_distinct_subjects(&subgraph, DistinctSubjectMode::Reference), 1);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_pass_by_value)]

/// Core data structures and encodings
pub mod core;

/// Configuration structures and defaults
pub mod config;

/// Logging setup shared by the binaries
pub mod logging;

/// Record sources for the batch pipeline
pub mod sources;

/// The batch ingestion pipeline
pub mod pipeline;

/// Streaming ingest core shared by the network front ends
pub mod ingest;

/// RPC streaming front end
pub mod rpc;

/// HTTP front end
pub mod http;

/// Signal handling and graceful drain
pub mod shutdown;

pub mod error {
    //! Error types and result definitions

    use crate::config::ConfigError;
    use crate::core::DecodeError;
    use crate::ingest::PublishError;
    use crate::pipeline::PipelineError;
    use crate::shutdown::{ListenError, ServeError};
    use crate::sources::SourceError;
    use thiserror::Error;

    /// Result type alias for Megamind operations
    pub type Result<T> = std::result::Result<T, Error>;

    /// Top-level error type, mostly used by the binaries
    #[derive(Error, Debug)]
    pub enum Error {
        /// Configuration error
        #[error("Configuration error: {0}")]
        Config(#[from] ConfigError),
        /// Record source error
        #[error("Source error: {0}")]
        Source(#[from] SourceError),
        /// Malformed record or message
        #[error("Decode error: {0}")]
        Decode(#[from] DecodeError),
        /// Publish or merge extension point failure
        #[error("Publish error: {0}")]
        Publish(#[from] PublishError),
        /// Batch pipeline terminal error
        #[error("Pipeline error: {0}")]
        Pipeline(#[from] PipelineError),
        /// Listener could not be bound
        #[error("Listen error: {0}")]
        Listen(#[from] ListenError),
        /// Listener failed while serving
        #[error("Serve error: {0}")]
        Serve(#[from] ServeError),
        /// IO error
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }
}

// Re-export commonly used types
pub use error::{Error, Result};
