use axum::{Json, Router, routing::get};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::AppState;

pub mod appointment_routes;
pub mod auth_routes;
pub mod dashboard_routes;
pub mod doctor_routes;
pub mod user_routes;

#[cfg(test)]
mod flow_tests;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/users", user_routes::router())
        .nest(
            "/api/v1",
            doctor_routes::router()
                .merge(appointment_routes::router())
                .merge(dashboard_routes::router()),
        )
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Clinic calendar day. Dates are stored and compared in UTC.
pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn parse_date(s: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{field} must be YYYY-MM-DD")))
}

pub(crate) fn parse_uuid(s: &str, field: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(s.trim()).map_err(|_| ApiError::validation(format!("{field} must be a UUID")))
}
