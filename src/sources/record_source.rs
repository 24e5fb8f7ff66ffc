use crate::config::DEFAULT_MAX_RECORD_BYTES;
use crate::core::Framing;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Designator meaning "read from standard input"
pub const STDIN: &str = "-";

/// Where a batch source reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Stdin,
    Path(String),
}

impl SourceSpec {
    /// Parse a designator; `-` (after trimming) selects standard input.
    pub fn parse(designator: &str) -> Self {
        let designator = designator.trim();
        if designator == STDIN {
            SourceSpec::Stdin
        } else {
            SourceSpec::Path(designator.to_string())
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Stdin => f.write_str("stdin"),
            SourceSpec::Path(path) => f.write_str(path),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open source {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read from source: {0}")]
    Read(#[from] std::io::Error),

    #[error("record exceeds the {max} byte limit")]
    RecordTooLarge { max: usize },

    #[error("truncated record: expected {expected} bytes")]
    Truncated { expected: usize },

    #[error("invalid record length prefix")]
    InvalidLengthPrefix,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Sequential reader of raw records.
///
/// The underlying handle is owned, so it is released whenever the source is
/// dropped: on end of input, on error, or when the reading task is cancelled.
pub struct RecordSource {
    name: String,
    reader: BufReader<BoxedReader>,
    framing: Framing,
    max_record_bytes: usize,
    records_read: u64,
}

impl RecordSource {
    /// Open a file or standard input.
    pub async fn open(spec: &SourceSpec, framing: Framing) -> Result<Self, SourceError> {
        let reader: BoxedReader = match spec {
            SourceSpec::Stdin => Box::new(tokio::io::stdin()),
            SourceSpec::Path(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| SourceError::Open { name: path.clone(), source })?;
                Box::new(file)
            }
        };
        Ok(Self::from_reader(spec.to_string(), reader, framing))
    }

    /// Wrap any async reader, e.g. a socket or an in-memory pipe.
    pub fn from_reader<R>(name: impl Into<String>, reader: R, framing: Framing) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            reader: BufReader::new(Box::new(reader)),
            framing,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            records_read: 0,
        }
    }

    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Next raw record, or `None` once the input is exhausted.
    pub async fn next_record(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let record = match self.framing {
            Framing::Lines => self.next_line().await?,
            Framing::LengthDelimited => self.next_delimited().await?,
        };
        if record.is_some() {
            self.records_read += 1;
        }
        Ok(record)
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let limit = (self.max_record_bytes as u64).saturating_add(1);
        loop {
            let mut buf = Vec::new();
            let n = (&mut self.reader).take(limit).read_until(b'\n', &mut buf).await?;
            if n == 0 {
                return Ok(None);
            }

            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            } else if buf.len() > self.max_record_bytes {
                return Err(SourceError::RecordTooLarge { max: self.max_record_bytes });
            }

            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(buf));
        }
    }

    async fn next_delimited(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let Some(len) = self.read_length_prefix().await? else {
            return Ok(None);
        };
        if len > self.max_record_bytes {
            return Err(SourceError::RecordTooLarge { max: self.max_record_bytes });
        }

        let mut buf = vec![0u8; len];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(Some(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(SourceError::Truncated { expected: len })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Protobuf base-128 varint; `None` on a clean end of input.
    async fn read_length_prefix(&mut self) -> Result<Option<usize>, SourceError> {
        let mut value: u64 = 0;
        for i in 0..10 {
            let byte = match self.reader.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if i == 0 {
                        return Ok(None);
                    }
                    return Err(SourceError::InvalidLengthPrefix);
                }
                Err(e) => return Err(e.into()),
            };
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return usize::try_from(value)
                    .map(Some)
                    .map_err(|_| SourceError::InvalidLengthPrefix);
            }
        }
        Err(SourceError::InvalidLengthPrefix)
    }
}
