//! Ingest Server Binary for Megamind
//!
//! Serves the streaming ingest front ends: the RPC stream, the HTTP endpoint,
//! or both in one process sharing the same ingest core.
//!
//! Usage:
//!   cargo run --bin ingest_server -- rpc --rpc-addr 0.0.0.0:8080
//!   cargo run --bin ingest_server -- http --http-addr 0.0.0.0:8081 --http-drain-timeout-secs 30
//!   cargo run --bin ingest_server -- all --count-nested-subjects

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use megamind::config::{ServerConfig, DEFAULT_HTTP_ADDR, DEFAULT_RPC_ADDR};
use megamind::http::HttpServer;
use megamind::ingest::{DistinctSubjectMode, LoggingPublisher, SubgraphIngester};
use megamind::logging::{self, LogArgs};
use megamind::rpc::RpcServer;
use megamind::shutdown::{self, DrainPolicy, ShutdownOutcome};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ingest_server")]
#[command(about = "Megamind subgraph ingest server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the streaming RPC front end
    Rpc(ServerArgs),
    /// Serve the HTTP front end
    Http(ServerArgs),
    /// Serve both front ends
    All(ServerArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Address of the RPC listener
    #[arg(long, env = "MEGAMIND_RPC_ADDR", default_value = DEFAULT_RPC_ADDR)]
    rpc_addr: String,

    /// Address of the HTTP listener
    #[arg(long, env = "MEGAMIND_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    http_addr: String,

    /// Upper bound on the HTTP drain after shutdown; 0 waits forever
    #[arg(long, env = "MEGAMIND_HTTP_DRAIN_TIMEOUT_SECS", default_value = "60")]
    http_drain_timeout_secs: u64,

    /// Upper bound on the RPC drain after shutdown; unbounded when unset
    #[arg(long, env = "MEGAMIND_RPC_DRAIN_TIMEOUT_SECS")]
    rpc_drain_timeout_secs: Option<u64>,

    /// Count nested subject references towards distinct subjects
    #[arg(long, env = "MEGAMIND_COUNT_NESTED_SUBJECTS")]
    count_nested_subjects: bool,
}

impl ServerArgs {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            rpc_addr: self.rpc_addr.clone(),
            http_addr: self.http_addr.clone(),
            rpc_drain: DrainPolicy::from_secs(self.rpc_drain_timeout_secs),
            http_drain: DrainPolicy::from_secs(Some(self.http_drain_timeout_secs)),
            distinct_subjects: if self.count_nested_subjects {
                DistinctSubjectMode::IncludeNested
            } else {
                DistinctSubjectMode::Reference
            },
        }
    }
}

async fn run_rpc(config: &ServerConfig, ingester: SubgraphIngester, token: CancellationToken) -> anyhow::Result<ShutdownOutcome> {
    let listener = shutdown::bind(&config.rpc_addr).await?;
    let server = RpcServer::new(ingester).with_drain_policy(config.rpc_drain);
    server.serve(listener, token).await.context("rpc server failed")
}

async fn run_http(config: &ServerConfig, ingester: SubgraphIngester, token: CancellationToken) -> anyhow::Result<ShutdownOutcome> {
    let listener = shutdown::bind(&config.http_addr).await?;
    let server = HttpServer::new(ingester).with_drain_policy(config.http_drain);
    server.serve(listener, token).await.context("http server failed")
}

async fn run(command: Command) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(token.clone());

    let (args, rpc, http) = match &command {
        Command::Rpc(args) => (args, true, false),
        Command::Http(args) => (args, false, true),
        Command::All(args) => (args, true, true),
    };
    let config = args.config();
    let ingester = SubgraphIngester::new(Arc::new(LoggingPublisher)).with_mode(config.distinct_subjects);

    info!(
        rpc_addr = rpc.then_some(config.rpc_addr.as_str()),
        http_addr = http.then_some(config.http_addr.as_str()),
        distinct_subjects = ?config.distinct_subjects,
        "starting ingest server"
    );

    // A failing front end takes the other one down with it.
    let outcomes = match (rpc, http) {
        (true, true) => {
            let (rpc_result, http_result) = tokio::join!(
                async {
                    let result = run_rpc(&config, ingester.clone(), token.clone()).await;
                    token.cancel();
                    result
                },
                async {
                    let result = run_http(&config, ingester.clone(), token.clone()).await;
                    token.cancel();
                    result
                },
            );
            vec![rpc_result?, http_result?]
        }
        (true, false) => vec![run_rpc(&config, ingester, token.clone()).await?],
        _ => vec![run_http(&config, ingester, token.clone()).await?],
    };
    signals.abort();

    if outcomes.contains(&ShutdownOutcome::TimedOut) {
        info!("ingest server stopped after drain timeout");
    } else {
        info!("ingest server stopped");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "ingest server failed");
            ExitCode::FAILURE
        }
    }
}
