use std::sync::Arc;

use merge_drop_server::config::ServerConfig;
use merge_drop_server::kv_store::FileStore;
use merge_drop_server::rank_service::{rank_router, RankService};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();
    let config = ServerConfig::from_env();
    if let Err(err) = run(config).await {
        error!(error = %err, "[server] startup failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn run(config: ServerConfig) -> std::io::Result<()> {
    if config.clear_secret.is_none() {
        warn!("[server] CLEAR_RANK_SECRET not set; /rank/clear is disabled");
    }
    let store = FileStore::new(&config.store_dir);
    info!(store_dir = %store.dir().display(), "[server] ranking storage");
    let service = Arc::new(RankService::new(store, config.clear_secret.clone()));
    let app = rank_router(service);

    let app = if let Some(static_dir) = config.resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "[server] static file root");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        info!("[server] no static file root found; serving the ranking API only");
        app
    };

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(port = config.port, "[server] listening");
    axum::serve(listener, app).await
}
