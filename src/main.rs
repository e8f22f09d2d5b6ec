use clap::Parser;
use std::error::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use feed_gateway::config::{Args, Config};
use feed_gateway::handlers;
use feed_gateway::optimizer::PoolRegistry;
use feed_gateway::state::AppState;

fn main() -> Result<(), Box<dyn Error>> {
    // parse cli arguments
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("feed_gateway=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            warn!("no config file given, running with defaults and no api sources");
            Config::default().normalized()
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    // runtime threads follow performance.max-parallelism
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(PoolRegistry::runtime_worker_threads(&config.performance))
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&config, shutdown.clone()).await?;
    state.spawn_background(config.monitor.interval, config.health.interval);

    let app = handlers::router(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "feed gateway listening");
    info!(
        services = ?state.dispatcher.clients().names(),
        widgets = state.widgets.len(),
        cache = ?config.cache.cache_type,
        "configuration loaded"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    state.dispatcher.shutdown().await;
    info!("feed gateway stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}
