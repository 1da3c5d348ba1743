mod auth;
mod booking;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod routes;
mod schedule;

use crate::{config::Config, models::AppState, schedule::format_slot};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;

    tracing::info!(
        open = %format_slot(cfg.clinic.open()),
        close = %format_slot(cfg.clinic.close()),
        slot_minutes = cfg.clinic.slot_minutes(),
        slots = cfg.clinic.slots().len(),
        "clinic hours"
    );

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        clinic: cfg.clinic,
    };

    // Browser frontend is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
