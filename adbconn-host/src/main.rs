//! adbconn-host - entry point.
//!
//! ```text
//! adbconn-host                           Run the coordinator (foreground)
//! adbconn-host --config <path>           Load a custom config TOML
//! adbconn-host --gen-config              Write default config to stdout
//! adbconn-host probe <addr> [-t HELO]    Send one monitor chunk as a debugger
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use adbconn_core::packet::TypeName;
use adbconn_core::{Collaborators, DebuggerController, UnixDaemonClient};
use adbconn_host::agent::CommandAgentAttacher;
use adbconn_host::config::HostConfig;
use adbconn_host::probe::{parse_chunk_type, probe};
use adbconn_host::runtime::{LoggingMonitor, ProcessRuntime};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "adbconn-host", about = "Debugger connection coordinator host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "adbconn-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator until Ctrl-C.
    Run,
    /// Connect as a debugger and exchange one monitor chunk.
    Probe {
        /// Address of the forwarded debug port.
        addr: SocketAddr,
        /// Four-character chunk type to send.
        #[arg(short = 't', long, default_value = "HELO", value_parser = parse_chunk_type)]
        chunk_type: u32,
        /// Seconds to wait for each response.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = HostConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Probe {
            addr,
            chunk_type,
            timeout,
        } => {
            let chunk = probe(addr, chunk_type, Duration::from_secs(timeout)).await?;
            println!(
                "{} ({} bytes): {:02x?}",
                TypeName(chunk.chunk_type),
                chunk.payload.len(),
                chunk.payload.as_ref()
            );
            Ok(())
        }
    }
}

async fn run(config: HostConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("adbconn-host v{}", env!("CARGO_PKG_VERSION"));
    info!("daemon socket: {}", config.daemon.socket);
    info!(
        "debuggable: {}, profileable: {}",
        config.process.debuggable, config.process.profileable
    );

    let runtime = Arc::new(ProcessRuntime::new(config.process.clone()));
    let collab = Collaborators::new(
        runtime.clone(),
        Arc::new(UnixDaemonClient::new(config.daemon_address())),
        Arc::new(LoggingMonitor),
        Arc::new(CommandAgentAttacher::new(config.agent.command.clone())),
    );

    let mut controller = DebuggerController::new(config.coordinator.clone(), collab)?;
    if !controller.is_debugger_configured() {
        info!("no debugger configured; only profiling is available");
    }
    controller.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    runtime.begin_shutdown();

    // stop() joins the worker thread.
    tokio::task::spawn_blocking(move || controller.stop()).await?;
    Ok(())
}
