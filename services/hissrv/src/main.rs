//! hissrv - historian service binary
//!
//! Reads bus deliveries as JSON lines on stdin and writes replies and
//! notifications to stdout; logs go to stderr (and optionally files).

use anyhow::Context;
use clap::Parser;
use hissrv::backends::connect_all_with_retry;
use hissrv::bus::{RpcTable, StdioTransport, Transport};
use hissrv::config::{Config, DEFAULT_CONFIG_PATH};
use hissrv::directory::{Directory, MemoryDirectory};
use hissrv::logging::init_logging;
use hissrv::shutdown::wait_for_shutdown;
use hissrv::{Engine, EngineState, SERVICE_NAME, SERVICE_VERSION};
use historian_store::{BackendRegistry, SystemTimeProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

/// Inbound deliveries waiting for the engine
const INBOX_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "hissrv", version, about = "Historian service")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "HISSRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level or filter, overrides the configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    let log_guard =
        init_logging(&config.logging, &config.service.name).context("Failed to initialize logging")?;

    info!(
        service = SERVICE_NAME,
        version = SERVICE_VERSION,
        config = %args.config.display(),
        backends = config.backends.len(),
        "Starting"
    );

    let stop = Arc::new(Notify::new());
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            wait_for_shutdown().await;
            info!("Shutdown signal received");
            stop.notify_one();
        });
    }

    // Backends
    let registry = Arc::new(BackendRegistry::new());
    if !connect_all_with_retry(
        &config.backends,
        &registry,
        config.service.reconnect_interval(),
        &stop,
    )
    .await
    {
        info!("Stopped before all backends were connected");
        return Ok(());
    }

    // Directory
    let directory: Arc<dyn Directory> = match &config.directory.path {
        Some(path) => Arc::new(
            MemoryDirectory::from_yaml_file(path)
                .with_context(|| format!("Failed to load directory seed {path}"))?,
        ),
        None => {
            warn!("No directory seed configured, starting empty");
            Arc::new(MemoryDirectory::new())
        }
    };

    // Engine
    let transport = Arc::new(StdioTransport::new(config.service.queue.clone()));
    let rpc = Arc::new(RpcTable::new(config.service.rpc_timeout()));
    let state = EngineState::new(
        Arc::clone(&registry),
        config.write_buffer_config(),
        Arc::new(SystemTimeProvider),
    );
    let engine = Arc::new(Engine::new(
        state,
        directory,
        Arc::clone(&transport) as Arc<dyn Transport>,
        rpc,
    ));
    engine.restore().await.context("Failed to restore engine state")?;

    let flush_shutdown = Arc::new(Notify::new());
    let flush_handle = {
        let engine = Arc::clone(&engine);
        let shutdown = Arc::clone(&flush_shutdown);
        tokio::spawn(async move { engine.state().run_flush_loop(shutdown).await })
    };

    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let engine_handle = tokio::spawn(Arc::clone(&engine).run(inbox_rx));

    let input_shutdown = Arc::new(Notify::new());
    let mut input_handle = tokio::spawn(Arc::clone(&transport).read_loop(
        BufReader::new(tokio::io::stdin()),
        inbox_tx,
        Arc::clone(&input_shutdown),
    ));

    info!(queue = %config.service.queue, "{} ready", SERVICE_NAME);

    let input_result = tokio::select! {
        _ = stop.notified() => {
            input_shutdown.notify_one();
            (&mut input_handle).await
        }
        result = &mut input_handle => result,
    };
    match input_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Bus input failed"),
        Err(e) => error!(error = %e, "Bus input task panicked"),
    }

    // Inbox closes once the reader is gone; queued deliveries drain first
    if let Err(e) = engine_handle.await {
        error!(error = %e, "Engine task panicked");
    }

    flush_shutdown.notify_one();
    if let Err(e) = flush_handle.await {
        error!(error = %e, "Flush task panicked");
    }

    info!("{} stopped", SERVICE_NAME);
    drop(log_guard);
    // The blocking stdin read would otherwise keep the runtime from exiting
    std::process::exit(0)
}
