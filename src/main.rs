use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use chatvoice::config::ConfigHandle;
use chatvoice::feed::FeedClient;
use chatvoice::voice::{
    AudioComposer, DecisionEngine, GoogleTranslate, GoogleTts, MessageLedger, PlaybackScheduler,
    RodioOutput, SpeechPipeline,
};

/// Reads a live chat feed aloud.
#[derive(Debug, Parser)]
#[command(name = "chatvoice", version, about)]
struct Cli {
    /// Config file (default: ./config.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level for chatvoice (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Feed WebSocket URL (overrides feed.url)
    #[arg(long)]
    url: Option<String>,

    /// Validate the config, print it and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = Arc::new(ConfigHandle::load(cli.config.as_deref())?);

    if cli.check_config {
        let snapshot = config.snapshot();
        let rendered =
            toml::to_string_pretty(snapshot.as_ref()).context("Failed to render config")?;
        match config.path() {
            Some(path) => println!("# {}", path.display()),
            None => println!("# built-in defaults"),
        }
        print!("{rendered}");
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting chatvoice");

    let google = Arc::new(GoogleTranslate::new());
    let decision = DecisionEngine::new(google.clone(), google);
    let composer = AudioComposer::new(Arc::new(GoogleTts::new()));
    let scheduler = PlaybackScheduler::new(Arc::new(RodioOutput));

    let ledger = MessageLedger::new();
    let pipeline = Arc::new(SpeechPipeline::new(
        Arc::clone(&ledger),
        Arc::clone(&config),
        decision,
        composer,
        scheduler,
    ));
    let feed = FeedClient::new(cli.url, config, ledger);

    let shutdown = CancellationToken::new();
    let consumer = tokio::spawn(Arc::clone(&pipeline).run(shutdown.clone()));
    let listener = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { feed.run(shutdown).await })
    };

    shutdown_signal().await;
    shutdown.cancel();

    let (consumer, listener) = tokio::join!(consumer, listener);
    for (task, result) in [("pipeline", consumer), ("feed", listener)] {
        if let Err(e) = result {
            tracing::error!(task, error = %e, "Task ended abnormally");
        }
    }

    let stats = pipeline.stats();
    tracing::info!(
        played = stats.played,
        skipped = stats.skipped,
        cancelled = stats.cancelled,
        failed = stats.failed,
        avg_prepare_ms = stats.avg_prepare_ms,
        "chatvoice stopped"
    );
    Ok(())
}

fn init_tracing(level: Option<&str>) {
    let quiet = "reqwest=warn,hyper=warn,hyper_util=warn,tungstenite=warn";
    let filter = match level {
        Some(level) => EnvFilter::new(format!("chatvoice={level},{quiet}")),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("chatvoice=info,{quiet}"))),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .init();
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
