use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

mod config;
mod db;
mod error;
mod handlers;
mod models;
mod telemetry;

use crate::config::{Config, RouteLayout};
use crate::db::{PgProductRepository, ProductRepository};
use crate::telemetry::{Observability, Telemetry};

/// Shared application state. Cheap to clone; everything sits behind an Arc.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn ProductRepository>,
    pub telemetry: Telemetry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (ignored in production where env vars are injected)
    dotenv::dotenv().ok();

    let config = Config::from_env()?;

    // Structured logging, plus OTLP span export when a collector is configured
    let observability = Observability::init(&config.telemetry)?;

    info!("Starting product service...");

    // No storage, no service: connection and migration failures end the process here.
    let pool = db::connect(&config.database).await?;

    let telemetry = Telemetry::new(&config.telemetry);
    info!(
        enabled = telemetry.is_enabled(),
        exporting = observability.is_exporting(),
        "Telemetry configured."
    );

    let state = AppState {
        repository: Arc::new(PgProductRepository::new(pool.clone())),
        telemetry,
    };

    let app = build_router(state, config.route_layout);

    let addr = format!("{}:{}", config.host, config.port);
    info!(layout = ?config.route_layout, "Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Closing database pool...");
    pool.close().await;

    observability.shutdown();

    Ok(())
}

fn build_router(state: AppState, layout: RouteLayout) -> Router {
    let products = match layout {
        // ── Variant A ───────────────────────────────────────────────────────
        RouteLayout::Products => Router::new()
            .route(
                "/products/",
                post(handlers::products::create_product).get(handlers::products::list_products),
            )
            .route(
                "/products/:id",
                get(handlers::products::get_product)
                    .patch(handlers::products::update_product)
                    .delete(handlers::products::delete_product),
            ),

        // ── Variant B ───────────────────────────────────────────────────────
        RouteLayout::Root => Router::new()
            .route(
                "/",
                post(handlers::products::create_product).get(handlers::products::list_products),
            )
            .route(
                "/:id",
                patch(handlers::products::update_product).delete(handlers::products::delete_product),
            ),
    };

    products
        // ── Health ──────────────────────────────────────────────────────────
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)

        // ── Middleware ──────────────────────────────────────────────────────
        // Panics become 500s inside the transaction so it records the status.
        .layer(CatchPanicLayer::custom(handlers::handle_panic))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            telemetry::context::trace_context,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, draining in-flight requests...");
}
