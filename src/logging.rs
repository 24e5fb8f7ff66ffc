//! Logging setup shared by the binaries.
//!
//! The library itself only emits `tracing` events inside spans handed to each
//! component; installing a subscriber is left to the binaries.

use crate::config::ConfigError;
use clap::Args;
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::UnknownLogFormat(s.to_string())),
        }
    }
}

/// Logging flags flattened into every binary
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log level or filter directive; `RUST_LOG` takes precedence when set
    #[arg(long, env = "MEGAMIND_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log destination: `stderr`, `stdout` or a file path
    #[arg(long, env = "MEGAMIND_LOG_FILE", default_value = "stderr")]
    pub log_file: String,

    /// Log line format: text or json
    #[arg(long, env = "MEGAMIND_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

impl Default for LogArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: "stderr".to_string(),
            log_format: "text".to_string(),
        }
    }
}

fn filter(level: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level.trim()).map_err(|_| ConfigError::InvalidLogLevel(level.to_string()))
}

fn writer(dest: &str) -> Result<BoxMakeWriter, ConfigError> {
    match dest.trim() {
        "stderr" => Ok(BoxMakeWriter::new(std::io::stderr)),
        "stdout" => Ok(BoxMakeWriter::new(std::io::stdout)),
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ConfigError::LogFile { path: path.to_string(), source })?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
    }
}

/// Install the global subscriber. Calling it twice is harmless; the second
/// call keeps the first subscriber.
pub fn init(args: &LogArgs) -> Result<(), ConfigError> {
    let format: LogFormat = args.log_format.parse()?;
    let filter = filter(&args.log_level)?;
    let writer = writer(&args.log_file)?;
    let ansi = match args.log_file.trim() {
        "stderr" => std::io::stderr().is_terminal(),
        "stdout" => std::io::stdout().is_terminal(),
        _ => false,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    let _ = match format {
        LogFormat::Text => builder.with_ansi(ansi).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    Ok(())
}
