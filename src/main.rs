//! oscmidi - OSC to MIDI bridge

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oscmidi::config::{Args, BridgeConfig};
use oscmidi::mapping::{MappingStore, PersistOnExit, PING_ADDRESS};
use oscmidi::midi::{self, MidirSink};
use oscmidi::osc::OscListener;
use oscmidi::translator::Translator;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_ports {
        midi::print_ports()?;
        return Ok(());
    }

    let config = BridgeConfig::from_args(&args)?;
    run(config).await
}

async fn run(config: BridgeConfig) -> Result<()> {
    info!("Starting oscmidi...");

    let store = Arc::new(
        MappingStore::open(&config.mapping_in).context("Failed to load mapping file")?,
    );
    info!("{} mappings present, {} controllers free", store.len(), store.free());
    if let Some(controller) = store.resolve(PING_ADDRESS) {
        info!("{} is mapped to [176, {}, 0] by default", PING_ADDRESS, controller);
    }

    // From here on, every way out of this function saves the mapping
    let mut persist = PersistOnExit::new(store.clone(), &config.mapping_out);
    info!("Mapping will be saved to {}", persist.path().display());

    let sink = MidirSink::open(config.midi_port, &config.virtual_port)?;
    info!("Sending MIDI to {}", sink.port_name());
    let translator = Arc::new(Translator::new(store, Arc::new(sink), config.learn));
    if !translator.learn_enabled() {
        info!("Learning disabled, unknown OSC addresses will be ignored");
    }

    let listener = OscListener::bind(config.listen).await?;

    tokio::select! {
        result = listener.serve(translator.clone()) => {
            if let Err(e) = &result {
                warn!("OSC listener stopped: {:#}", e);
            }
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping");
        }
    }

    let stats = translator.stats();
    info!(
        "Sent {} messages, learned {} addresses, suppressed {} events",
        stats.sent, stats.learned, stats.suppressed
    );

    persist.finish()?;
    info!("oscmidi shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
