//! ---
//! uah_section: "05-daemon"
//! uah_subsection: "binary"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Binary entrypoint for the UA-Host daemon."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use path_absolutize::Absolutize;
use tokio::signal;
use tokio::task;
use tracing::{info, warn};
use uahost_common::{init_tracing, LocalizedText, LogFormat, LoggingConfig};
use uahost_core::LifecycleOrchestrator;
use uahost_rt::{BuildInfoNodeManager, LocalModuleFactory};

const PRODUCT_NAME: &str = "UA-Host";
const PRODUCT_URI: &str = "urn:uahost:product";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("UA-Host ", env!("CARGO_PKG_VERSION")),
    about = "UA-Host server daemon",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        value_name = "FILE",
        env = "UAHOST_CONFIG",
        default_value = "ServerConfig.xml",
        help = "Server configuration file (.xml or .ini), relative to the application path"
    )]
    config: PathBuf,

    #[arg(
        long,
        value_name = "DIR",
        env = "UAHOST_APPLICATION_PATH",
        help = "Value substituted for [ApplicationPath]; defaults to the current directory"
    )]
    application_path: Option<PathBuf>,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 5,
        help = "Seconds connected clients get to disconnect on shutdown"
    )]
    shutdown_grace: u32,

    #[arg(long, value_enum, default_value_t = CliLogFormat::StructuredJson)]
    log_format: CliLogFormat,

    #[arg(long, value_name = "DIR", help = "Also write process logs to this directory")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    StructuredJson,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::StructuredJson => LogFormat::StructuredJson,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Start the server and run until Ctrl-C")]
    Run,
    #[command(about = "Load and validate the configuration without starting the server")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(
        "uahostd",
        &LoggingConfig {
            format: cli.log_format.into(),
            filter: None,
            directory: cli.log_dir.clone(),
        },
    )?;

    let application_path = resolve_application_path(cli.application_path.as_deref())?;
    let config_path = application_path.join(&cli.config);
    info!(
        config_path = %config_path.display(),
        application_path = %application_path.display(),
        "daemon starting"
    );

    let factory = Arc::new(LocalModuleFactory::new());
    let orchestrator = Arc::new(LifecycleOrchestrator::new(factory));
    orchestrator.configure_file(
        config_path.to_string_lossy(),
        application_path.to_string_lossy(),
    )?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(orchestrator, cli.shutdown_grace).await?,
        Commands::CheckConfig => check_config(&orchestrator)?,
    }
    Ok(())
}

fn resolve_application_path(path: Option<&Path>) -> Result<PathBuf> {
    let path = path.unwrap_or_else(|| Path::new("."));
    let absolute = path
        .absolutize()
        .with_context(|| format!("unable to resolve application path {}", path.display()))?;
    Ok(absolute.into_owned())
}

async fn run_server(orchestrator: Arc<LifecycleOrchestrator>, shutdown_grace: u32) -> Result<()> {
    orchestrator.add_node_manager(Box::new(BuildInfoNodeManager::new(PRODUCT_NAME, PRODUCT_URI)))?;

    let starter = orchestrator.clone();
    let report = task::spawn_blocking(move || starter.start()).await??;
    if !report.endpoints.is_empty() {
        println!("{report}");
    }
    for failure in &report.node_manager_failures {
        warn!(node_manager = %failure.name, error = %failure.message, "node manager unavailable");
    }
    if let Some(trace_file) = orchestrator.server_trace_file() {
        info!(trace_file = %trace_file.display(), "server trace enabled");
    }

    info!(state = %orchestrator.state(), "server running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let stopper = orchestrator.clone();
    let stopped = task::spawn_blocking(move || {
        stopper.stop(shutdown_grace, &LocalizedText::new("en", "Server shut down"))
    })
    .await??;
    info!(
        connected_clients = stopped.connected_clients,
        drain_ms = stopped.drain.as_millis() as u64,
        "server stopped"
    );
    Ok(())
}

fn check_config(orchestrator: &LifecycleOrchestrator) -> Result<()> {
    let summary = orchestrator.check_configuration()?;
    info!(
        server_uri = %summary.server_uri,
        endpoints = summary.endpoints.len(),
        "configuration is valid"
    );
    println!("{}", toml::to_string_pretty(&summary)?);
    Ok(())
}
