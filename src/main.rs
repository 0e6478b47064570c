use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use optimizer_hub::config::HubConfig;
use optimizer_hub::dispatch::{Dispatcher, spawn_dispatch_loop};
use optimizer_hub::optimization::{OptimizationRegistry, spawn_sweep_loop};
use optimizer_hub::router::{ContactRouter, spawn_progress_forwarder};
use optimizer_hub::transport::{Transport, WsHub};

/// Buffered inbound transport events before sessions wait on the router.
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = HubConfig::from_env();

    eprintln!("🧬 Optimizer Hub v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Identity: {}", config.transport.hub_jid);
    eprintln!("   Workers WS: ws://{}/ws?jid=<id>", config.transport.bind_addr);
    eprintln!(
        "   Token: {}",
        if config.transport.token.is_some() { "required" } else { "none" }
    );
    eprintln!(
        "   Dispatch tick: {:?}, sweep: {:?}, keep-alive: {:?}\n",
        config.dispatch.tick_interval,
        config.registry.sweep_interval,
        config.registry.task_keep_alive
    );

    // ── Transport ────────────────────────────────────────────────────────
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let hub = WsHub::new(config.transport.clone(), events_tx);
    let transport: Arc<dyn Transport> = hub.clone();

    // ── Dispatch + registry ──────────────────────────────────────────────
    let dispatcher = Dispatcher::new(Arc::clone(&transport));
    let registry = OptimizationRegistry::new(
        config.registry.clone(),
        Arc::clone(&dispatcher),
        Arc::clone(&transport),
    );

    let _dispatch_handle = spawn_dispatch_loop(Arc::clone(&dispatcher), config.dispatch.tick_interval);
    let _sweep_handle = spawn_sweep_loop(Arc::clone(&registry), config.registry.sweep_interval);
    let _forwarder_handle = spawn_progress_forwarder(Arc::clone(&registry), Arc::clone(&transport));

    let router = ContactRouter::new(dispatcher, Arc::clone(&registry), transport);
    let _router_handle = router.run(events_rx);

    registry.publish_status().await;

    hub.serve().await.context("WebSocket hub stopped")?;
    Ok(())
}
