use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay::config::Config;
use relay::errors::StartupError;
use relay::pipeline::policy_cache::CachedPolicyStore;
use relay::state::AppState;
use relay::store::postgres::{create_pool, run_migrations, PostgresEventStore, PostgresPolicyStore};
use relay::store::{EventStore, PolicyStore};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

/// Everything that can fail before the server starts serving connections
/// propagates here (§7 "only unrecoverable initialization errors reach the
/// process entry point").
async fn run() -> Result<(), StartupError> {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    let bind_addr: std::net::SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| StartupError::BindAddr(config.bind_addr.clone(), e))?;

    info!("connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;
    info!("migrations applied");

    let event_store: Arc<dyn EventStore> = Arc::new(PostgresEventStore::new(pool.clone()));
    let policy_store: Arc<dyn PolicyStore> = Arc::new(CachedPolicyStore::new(
        PostgresPolicyStore::new(pool),
        Duration::from_secs(config.policy_cache_ttl_secs),
    ));

    let state = AppState::new(config, event_store, policy_store);
    let router = relay::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "relay listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("relay shut down gracefully");
    Ok(())
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful
/// shutdown (§6 [AMBIENT]).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
