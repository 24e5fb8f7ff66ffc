//! Subgraph CLI - batch ingest of encoded subgraphs from a file or stdin.
//!
//! Usage:
//!   subgraph_cli data/subgraphs.jsonl
//!   subgraph_cli --encoding proto data/subgraphs.bin
//!   cat data/subgraphs.jsonl | subgraph_cli - --max-in-flight 0

use clap::Parser;
use megamind::config::{
    PipelineConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_RECORD_BYTES,
};
use megamind::core::Encoding;
use megamind::logging::{self, LogArgs};
use megamind::pipeline::{BatchPipeline, LoggingMerger, MemoryTracker, PipelineOutcome};
use megamind::shutdown;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "subgraph_cli")]
#[command(about = "Megamind batch ingest - decode, fan out and merge subgraphs")]
struct Args {
    /// Input file path, or `-` for standard input
    source: String,

    /// Record encoding: json (one subgraph per line) or proto (length-delimited)
    #[arg(short, long, env = "MEGAMIND_ENCODING", default_value = "json")]
    encoding: String,

    /// Telemetry sampling interval in milliseconds
    #[arg(long, env = "MEGAMIND_TELEMETRY_INTERVAL_MS", default_value = "1000")]
    telemetry_interval_ms: u64,

    /// Concurrent per-record fan-out tasks (0 = unbounded)
    #[arg(long, env = "MEGAMIND_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Capacity of the shared triple channel
    #[arg(long, env = "MEGAMIND_CHANNEL_CAPACITY", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,

    /// Largest accepted record in bytes
    #[arg(long, env = "MEGAMIND_MAX_RECORD_BYTES", default_value_t = DEFAULT_MAX_RECORD_BYTES)]
    max_record_bytes: usize,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = logging::init(&args.log) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let encoding: Encoding = match args.encoding.parse() {
        Ok(encoding) => encoding,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let config = PipelineConfig {
        channel_capacity: args.channel_capacity,
        max_in_flight: (args.max_in_flight > 0).then_some(args.max_in_flight),
        telemetry_interval: Duration::from_millis(args.telemetry_interval_ms),
        max_record_bytes: args.max_record_bytes,
        ..PipelineConfig::new(args.source.clone(), encoding)
    };

    let token = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(token.clone());
    let outcome = BatchPipeline::new(config, Arc::new(LoggingMerger)).run(token).await;
    signals.abort();

    let report = outcome.report();
    println!("\nSubgraph Ingest {:?}", outcome.state());
    println!("====================");
    println!("Source:             {}", args.source);
    println!("Subgraphs read:     {}", report.subgraphs_read);
    println!("Triples fanned out: {}", report.triples_fanned_out);
    println!("Triples merged:     {}", report.triples_merged);
    println!("Telemetry samples:  {}", report.telemetry_samples);
    if let Some(peak) = report.peak_resident_bytes {
        println!("Peak memory:        {}", MemoryTracker::format_bytes(peak));
    }
    println!("Elapsed time:       {:.2}s", report.elapsed.as_secs_f64());
    println!("Throughput:         {:.1} triples/sec", report.triples_per_second());

    match outcome {
        PipelineOutcome::Completed(_) => ExitCode::SUCCESS,
        PipelineOutcome::Cancelled(_) => ExitCode::FAILURE,
        PipelineOutcome::Failed { error, .. } => {
            error!(error = %error, "batch ingest failed");
            ExitCode::FAILURE
        }
    }
}
