//! Autoproxy daemon entry point.

use clap::Parser;
use log::{error, info};
use tokio::signal;

mod config;
mod driver;
mod error;
mod inventory;
mod reload;
mod render;
mod runtime;
mod sync;
mod types;

use config::Config;
use driver::Reconciler;
use reload::CommandReloader;
use render::Template;
use runtime::DockerRuntime;

/// Keeps a reverse proxy's virtual hosts in step with the running containers.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Logging level (use "debug" for verbose output)
    #[arg(long)]
    loglevel: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut cfg = Config::load()?;
    if let Some(level) = cli.loglevel {
        cfg.log_level = level;
    }

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(cfg.level_filter()?)
        .parse_default_env()
        .init();
    info!("Starting autoproxy with config: {:?}", cfg);

    let template = Template::load(&cfg.template_path)?;
    let runtime = DockerRuntime::connect(cfg.docker_socket.as_deref())?;
    let reloader = CommandReloader::new(&cfg.reload_command, cfg.reload_failure_marker.clone())
        .ok_or_else(|| anyhow::anyhow!("reload_command must name a program"))?;

    let reconciler = Reconciler::new(&cfg, runtime, reloader, template);

    tokio::select! {
        result = reconciler.run() => {
            if let Err(e) = result {
                error!("Unable to reconcile proxy configuration: {:#}", anyhow::Error::new(e));
                std::process::exit(1);
            }
        }
        res = signal::ctrl_c() => match res {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        },
    }

    info!("Shutdown complete.");
    Ok(())
}
