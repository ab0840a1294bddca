use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use torrentvault::backend_librqbit::LibrqbitBackend;
use torrentvault::{ManagerConfig, TorrentBackend, TorrentManager};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("torrentvault=debug,librqbit=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    tracing::info!("starting torrentvault v{}", env!("CARGO_PKG_VERSION"));

    let config = match ManagerConfig::load() {
        Ok(cfg) => {
            tracing::info!("configuration loaded successfully");
            tracing::debug!(data_dir = ?cfg.storage.data_dir, port = cfg.network.port, "storage configuration");
            cfg
        }
        Err(e) => {
            tracing::error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        tracing::error!("failed to create data directory: {}", e);
        std::process::exit(1);
    }

    let backend: Arc<dyn TorrentBackend> =
        match LibrqbitBackend::new(&config.storage.data_dir, &config.network).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::error!("failed to start torrent engine: {}", e);
                std::process::exit(1);
            }
        };

    let manager = match TorrentManager::new(config, backend).await {
        Ok(manager) => {
            tracing::info!("torrent manager started");
            manager
        }
        Err(e) => {
            tracing::error!("failed to start torrent manager: {}", e);
            std::process::exit(1);
        }
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(e) => tracing::warn!("failed to listen for shutdown signal: {}", e),
    }

    manager.close().await;
    tracing::info!("torrent manager closed cleanly");
}
