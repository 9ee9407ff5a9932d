use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use juggler3d::config;
use juggler3d::daemon::Daemon;
use juggler3d::registry::RegistryClient;
use juggler3d::web::api::{create_router, AppState};

/// Where the fetched G-code is staged before feeding.
const JOB_FILE: &str = "/tmp/job";

#[derive(Debug, Parser)]
#[command(name = "3djuggler", version)]
struct Args {
    /// Main config
    #[arg(long, default_value = "3djuggler.json")]
    config: PathBuf,

    /// Where to log
    #[arg(long, default_value = "/var/log/3djuggler.log")]
    log: PathBuf,

    /// Use verbose log output
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log)
        .map_err(|err| format!("failed to log to {}: {err}", args.log.display()))?;
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .init();

    info!("starting 3djuggler {}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&args.config).map_err(|err| {
        error!("{err}");
        Box::new(err) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let registry = RegistryClient::new(config.intern.clone())?;
    let mut daemon = Daemon::new(&config, registry, JOB_FILE);

    let state = Arc::new(AppState {
        job: daemon.job(),
        feeder: daemon.feeder(),
        transitions: daemon.transition_sender(),
    });
    let listener = tokio::net::TcpListener::bind(config.listen.as_str()).await?;
    info!("started http server on {}", listener.local_addr()?);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, create_router(state)).await {
            error!("http server failed: {err}");
        }
    });

    daemon.run().await;
    Ok(())
}
