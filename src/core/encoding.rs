//! Subgraph encodings and record framing
//!
//! Two encodings are supported, chosen once per pipeline run:
//!
//! - `json`: protobuf-JSON style structured text, one record per line;
//! - `proto`: protobuf binary, one varint-length-prefixed record after another.
//!
//! Binary records cannot be newline-framed: field 1 of a `Subgraph` is a
//! length-delimited field, so every non-empty message begins with `0x0A`.

use super::proto::SubgraphMessage;
use super::Subgraph;
use crate::config::ConfigError;
use prost::Message;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while turning raw bytes into a [`Subgraph`]
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Structured text was malformed or did not match the schema
    #[error("invalid json subgraph: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary payload was malformed
    #[error("invalid protobuf subgraph: {0}")]
    Proto(#[from] prost::DecodeError),
    /// A required field was absent from a binary payload
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// How records are delimited in a batch source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One record per `\n` terminated line
    Lines,
    /// Each record prefixed with its length as a protobuf varint
    LengthDelimited,
}

/// Wire encoding of a single subgraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    Proto,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Proto => "proto",
        }
    }

    /// Record framing used by batch sources of this encoding
    pub fn framing(self) -> Framing {
        match self {
            Encoding::Json => Framing::Lines,
            Encoding::Proto => Framing::LengthDelimited,
        }
    }

    /// Decode one unframed record
    pub fn decode(self, raw: &[u8]) -> Result<Subgraph, DecodeError> {
        match self {
            Encoding::Json => Ok(serde_json::from_slice(raw)?),
            Encoding::Proto => Subgraph::try_from(SubgraphMessage::decode(raw)?),
        }
    }

    /// Encode one subgraph without framing
    pub fn encode(self, subgraph: &Subgraph) -> Vec<u8> {
        match self {
            // Serializing plain strings and vectors into a Vec cannot fail.
            Encoding::Json => serde_json::to_vec(subgraph).unwrap_or_default(),
            Encoding::Proto => SubgraphMessage::from(subgraph).encode_to_vec(),
        }
    }

    /// Encode one subgraph with the framing its batch sources expect
    pub fn encode_record(self, subgraph: &Subgraph) -> Vec<u8> {
        match self {
            Encoding::Json => {
                let mut buf = self.encode(subgraph);
                buf.push(b'\n');
                buf
            }
            Encoding::Proto => SubgraphMessage::from(subgraph).encode_length_delimited_to_vec(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "proto" => Ok(Encoding::Proto),
            _ => Err(ConfigError::UnknownEncoding(s.to_string())),
        }
    }
}
