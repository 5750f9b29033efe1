use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use climate_monitor::{
    api::{self, AppState},
    capture::ReadingSource,
    config::Config,
    db::{self, PgReadingStore, ReadingStore},
    notifier::BroadcastNotifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent, env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(
        &config.database_url,
        config.database_max_connections,
        config.store_timeout,
    )
    .await
    .context("failed to connect to the database")?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    let store: Arc<dyn ReadingStore> = Arc::new(PgReadingStore::new(pool));
    let state = AppState::new(
        store,
        BroadcastNotifier::new(config.notifier_capacity),
        config.capture_policy.clone(),
        ReadingSource::new(config.reading_source_path.clone())
            .with_baud_rate(config.reading_source_baud),
        config.store_timeout,
    );

    if config.capture_autostart {
        // The API stays up so capture can be retried over HTTP.
        if let Err(e) = state.capture.start().await {
            tracing::error!(error = %e, "Capture autostart failed");
        }
    } else {
        info!(policy = %config.capture_policy, "Capture idle until POST /collecte/donnees/capture");
    }

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config.cors_allowed_origin.as_deref())?);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn cors_layer(origin: Option<&str>) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    Ok(match origin {
        Some(origin) => layer.allow_origin(
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS_ALLOWED_ORIGIN: {origin:?}"))?,
        ),
        None => layer.allow_origin(Any),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
