mod api;
mod config;
mod dialer;
mod error;
mod proxy;
mod routes;
mod trie;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use api::rest::AppState;
use config::Config;
use dialer::{BoundConnector, DeviceDialer};
use proxy::ProxyServer;
use routes::snapshot::RouteSnapshot;
use trie::AddressTrie;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Device router starting...");

    // Seed the trie with configured fixed devices and redirects
    let trie = Arc::new(AddressTrie::new());
    let inserted = trie.apply_rules(&config.fixed, &config.redirect).await;
    tracing::info!("Installed {} fixed entries", inserted);

    let shutdown = CancellationToken::new();

    let snapshot = Arc::new(RouteSnapshot::new(
        config.route_table.clone(),
        config.preferred_devices.clone(),
    ));
    let refresh_task = snapshot.spawn_refresh_task(config.device_refresh, shutdown.clone());

    let dialer = Arc::new(DeviceDialer::new(
        trie.clone(),
        snapshot.clone(),
        Arc::new(BoundConnector),
        config.connect_timeout,
    ));

    let status_task = if config.status_enabled {
        let state = Arc::new(AppState::new(trie.clone(), snapshot.clone()));
        let addr = config.status_listen;
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::rest::serve(addr, state, shutdown).await {
                tracing::error!("Status endpoint failed: {}", e);
            }
        }))
    } else {
        None
    };

    let server = ProxyServer::bind(config.listen, dialer).await?;
    tracing::info!("Transparent proxy listening on {}", server.local_addr()?);

    let proxy_task = tokio::spawn(server.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown.cancel();

    proxy_task.await?;
    if let Some(task) = refresh_task {
        task.await?;
    }
    if let Some(task) = status_task {
        task.await?;
    }

    Ok(())
}
