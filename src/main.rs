use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use imgserve::config::{Cli, ServerConfig};
use imgserve::pool::WorkerPool;
use imgserve::{bootstrap, precache, router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imgserve=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("starting imgserve");

    let cli = Cli::parse();
    let dump = cli.dump;
    let config = ServerConfig::from_cli(cli);

    if dump {
        println!(
            "{}",
            serde_json::json!({
                "port": config.port,
                "images_dir": config.images_dir,
                "cache_dir": config.cache_dir,
                "precache": config.precache,
                "precache_workers": config.precache_workers,
                "request_timeout_secs": config.request_timeout.as_secs(),
                "pool_size": config.pool_size,
                "queue_depth": config.queue_depth,
            })
        );
        return Ok(());
    }

    config.validate()?;

    let system_default_path = config.images_dir.join("system-default.webp");
    bootstrap::ensure_system_default(&system_default_path).await?;

    let pool_handle = WorkerPool::spawn(config.pool_size, config.queue_depth);
    let precache_on_startup = config.precache;
    let precache_workers = config.precache_workers;
    let port = config.port;

    let state = Arc::new(AppState::new(config, pool_handle.pool.clone()));

    if precache_on_startup {
        // A pool dedicated to the scan, sized by `precache_workers`, so
        // warming the cache at startup never contends with the main
        // request pool's concurrency or queue budget (spec §4.8).
        let precache_pool_handle =
            WorkerPool::spawn(precache_workers.max(1), precache_workers.max(1) * 4);
        let state = state.clone();
        tokio::spawn(async move {
            precache::run_precache(state, precache_pool_handle.pool.clone(), precache_workers)
                .await;
            precache_pool_handle.shutdown();
        });
    }

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}
