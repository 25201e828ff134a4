//! caplinkd: capability resolution daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::sync::mpsc;

use caplink_core::config::CaplinkConfig;
use caplink_services::{
    CapabilityRegistry, CapabilityResolver, DiscoveryCache, Dispatcher, PeerDirectory,
};

mod host;

#[tokio::main]
async fn main() -> Result<()> {
    // Events go to stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Load config
    if let Err(e) = CaplinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CaplinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CaplinkConfig::default()
    });
    config.validate().context("invalid configuration")?;

    tracing::info!(
        settle_delay_ms = config.dispatch.settle_delay_ms,
        typing_notifications = config.capabilities.typing_notifications,
        "caplinkd starting"
    );

    // Shared state
    let registry = CapabilityRegistry::from_config(&config.capabilities)?;
    let universe = config.capabilities.local_kinds()?;
    tracing::info!(kinds = ?universe, "local capabilities");
    let resolver = CapabilityResolver::new(registry.clone(), universe);
    let directory = PeerDirectory::new();
    let discovery = DiscoveryCache::new();

    let dispatcher = Dispatcher::new(
        resolver,
        directory.clone(),
        Arc::new(discovery.clone()),
        Duration::from_millis(config.dispatch.settle_delay_ms),
    )?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let subscription = dispatcher.subscribe(Arc::new(event_tx));

    let host = host::Host {
        registry,
        directory,
        discovery,
        dispatcher: dispatcher.clone(),
    };

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let input_task = tokio::spawn(host::input_loop(
        host,
        BufReader::new(tokio::io::stdin()),
    ));

    let output_task = tokio::spawn(host::output_loop(event_rx, tokio::io::stdout()));

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c()  => tracing::info!("shutdown signal received"),
        r = input_task               => match r {
            Ok(Ok(()))  => tracing::info!("host input finished"),
            Ok(Err(e))  => tracing::error!(error = %e, "host input failed"),
            Err(e)      => tracing::error!(error = %e, "host input task panicked"),
        },
    }

    // Dropping the last sink closes the event channel and lets the writer drain.
    dispatcher.unsubscribe(subscription);
    dispatcher.shutdown();
    match output_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "event output failed"),
        Err(e) => tracing::error!(error = %e, "event output task panicked"),
    }

    Ok(())
}
