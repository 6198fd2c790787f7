use std::sync::Arc;

use regex::Regex;
use tokio::sync::watch;
use tracing::{info, warn};

use slugdl::config::Config;
use slugdl::event::Broker;
use slugdl::fetch::{
    AggregatorRegistry, DirectAggregator, DirectHttp, DownloadDirs, FilehostRegistry, UrlDriver,
};
use slugdl::runner::{Runner, RunnerDeps};
use slugdl::server::{self, AppState};
use slugdl::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    config.ensure_dirs()?;

    info!(version = env!("CARGO_PKG_VERSION"), "slugdl starting");
    info!(bind = %config.bind_addr, max_concurrent = config.max_concurrent, "Configuration loaded");

    let store = store::open_store(config.db_path.as_deref()).await;

    let mut aggregators = AggregatorRegistry::new();
    aggregators.register(
        Arc::new(DirectAggregator::new()),
        vec![Regex::new(r"^https?://")?],
    )?;

    let mut filehosts = FilehostRegistry::new();
    filehosts.set_fallback(Arc::new(DirectHttp::new()));

    let broker = Arc::new(Broker::new());
    let runner = Runner::new(RunnerDeps {
        broker: Arc::clone(&broker),
        store: Arc::clone(&store),
        driver: Arc::new(UrlDriver),
        aggregators: Arc::new(aggregators),
        filehosts: Arc::new(filehosts),
        dirs: DownloadDirs {
            temp_dir: config.temp_dir.clone(),
            final_dir: config.download_dir.clone(),
        },
        max_concurrent: config.max_concurrent,
    });

    // Put interrupted work from the previous run back in the queue.
    match store::reconcile(&store, runner.proxy()).await {
        Ok(restored) if restored > 0 => info!(count = restored, "Resumed unfinished tasks"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Startup reconciliation failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner_handle = runner.spawn(shutdown_rx);

    let app = server::router(AppState {
        runner: Arc::clone(&runner),
        broker: Arc::clone(&broker),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    broker.close();
    let _ = runner_handle.await;
    info!("slugdl stopped");
    Ok(())
}
