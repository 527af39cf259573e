//! Ledger server binary
//!
//! Opens the document store and holds it until interrupted. The HTTP layer
//! (routing, authentication) mounts on top of [`split_ledger::Ledger`].

use split_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting SplitFree ledger server");

    // Load configuration: file given as first argument, env overrides otherwise
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let ledger = Ledger::open(config)?;
    tracing::info!(
        data_dir = ?ledger.config().data_dir,
        listen_addr = %ledger.config().listen_addr,
        max_batch = ledger.config().sync.max_batch_size,
        "Ledger opened successfully"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!(
        sync_items_applied = ledger.metrics().sync_items_applied.get(),
        sync_items_failed = ledger.metrics().sync_items_failed.get(),
        "Shutting down ledger server"
    );
    Ok(())
}
