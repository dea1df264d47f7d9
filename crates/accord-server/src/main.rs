mod sweep;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use accord_api::AppStateInner;
use accord_engine::{Dispatcher, Engine, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "accord_server=debug,accord_api=debug,accord_engine=debug,accord_db=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("ACCORD_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("ACCORD_DB_PATH").unwrap_or_else(|_| "accord.db".into());
    let host = std::env::var("ACCORD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ACCORD_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let sweep_interval: u64 = std::env::var("ACCORD_SWEEP_INTERVAL_SECS")
        .unwrap_or_else(|_| "60".into())
        .parse()?;
    let config = EngineConfig::from_env();

    // Init database
    let db = Arc::new(accord_db::Database::open(&PathBuf::from(&db_path))?);

    // Engine
    let dispatcher = Dispatcher::new();
    let engine = Arc::new(
        Engine::new(db, config).with_notifier(Arc::new(dispatcher.clone())),
    );

    tokio::spawn(relay_events(dispatcher));
    tokio::spawn(sweep::run_sweep_loop(engine.clone(), sweep_interval.max(1)));

    let app = accord_api::router(Arc::new(AppStateInner { engine, jwt_secret }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Accord server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Accord server stopped");
    Ok(())
}

/// Hand lifecycle events to the outside world. For now that is the log; a
/// publisher subscribes to the same dispatcher.
async fn relay_events(dispatcher: Dispatcher) {
    let mut rx = dispatcher.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                debug!(
                    "Event {} for {:?}: {}",
                    event.kind(),
                    event.recipients(),
                    payload
                );
            }
            Err(RecvError::Lagged(n)) => warn!("Event relay lagged, dropped {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
