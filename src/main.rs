//! coderun CLI entry point.
//!
//! - `coderun run <FILE>` compiles and runs one file and prints the adapter JSON
//! - `coderun serve` starts the HTTP adapter

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use coderun_common::{ConfigFile, ExecutionContext, OptimizationLevel};
use coderun_core::Orchestrator;
use coderun_server::{CoderunServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "coderun", version, about = "Compile and run untrusted Rust in a sandbox")]
struct Cli {
    /// TOML config file; `CODERUN__*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile and run a single source file.
    Run(RunArgs),
    /// Serve the HTTP API.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Rust source file containing `fn main`.
    file: PathBuf,

    /// Seconds allowed for compilation and, separately, for execution.
    #[arg(long)]
    timeout: Option<u64>,

    /// Memory ceiling for the program, in MiB (0 = none).
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Allow the program to use the network.
    #[arg(long)]
    network: bool,

    /// Dependency to make available (repeatable).
    #[arg(long = "dependency", value_name = "NAME")]
    dependencies: Vec<String>,

    /// Feature flag to enable (repeatable).
    #[arg(long = "feature", value_name = "NAME")]
    features: Vec<String>,

    /// Optimization level: debug, O1, O2, O3, size, size-min.
    #[arg(long, default_value = "debug")]
    opt: OptimizationLevel,

    /// Keep the workspace directory afterwards.
    #[arg(long)]
    keep_workspace: bool,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Address to listen on; overrides the config file.
    #[arg(long, env = "CODERUN_BIND")]
    bind: Option<SocketAddr>,
}

impl RunArgs {
    fn context(&self) -> ExecutionContext {
        let mut builder = ExecutionContext::builder()
            .network_enabled(self.network)
            .allow_dependencies(self.dependencies.iter().cloned())
            .extra_features(self.features.iter().cloned())
            .optimization_level(self.opt)
            .retain_workspace(self.keep_workspace);

        if let Some(secs) = self.timeout {
            builder = builder.timeout_secs(secs);
        }
        if let Some(mb) = self.memory_mb {
            builder = builder.memory_limit_mb(mb);
        }

        builder.build()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ConfigFile::load_layered(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Run(args) => run(&config, &args).await,
        Command::Serve(args) => {
            serve(config, args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr so `run` keeps stdout for its JSON report.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,coderun=debug,coderun_core=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(config: &ConfigFile, args: &RunArgs) -> anyhow::Result<ExitCode> {
    let source = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let orchestrator = Orchestrator::start(&config.runtime)
        .await
        .context("Cannot start without a working toolchain")?;

    let result = orchestrator.execute(&source, &args.context()).await;

    let report = serde_json::to_string_pretty(&result.to_adapter())
        .context("Failed to serialize result")?;
    println!("{report}");

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn serve(config: ConfigFile, args: ServeArgs) -> anyhow::Result<()> {
    info!("Starting coderun");

    let mut server_config =
        ServerConfig::from_file(&config.server).context("Invalid [server] configuration")?;
    if let Some(bind) = args.bind {
        server_config = server_config.with_bind_addr(bind);
    }

    let orchestrator = Orchestrator::start(&config.runtime)
        .await
        .context("Cannot start without a working toolchain")?;

    info!(bind_addr = %server_config.bind_addr, "Configuration loaded");
    info!("Server initialized. Available endpoints:");
    info!("  POST /execute             - Compile and run a submission");
    info!("  GET  /health              - Health check");
    info!("  GET  /ready               - Readiness check");

    let server = CoderunServer::new(orchestrator, config.runtime.limits, server_config);
    server.run().await?;

    Ok(())
}
