//! Storefront checkout and order backend.
//!
//! Carts flow into immutable checkouts, checkouts are settled either by a
//! bank transfer notification or a cash on delivery confirmation, and
//! settlement finalizes them into orders exactly once.

#![forbid(unsafe_code)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::handlers::AppServices;

/// Shared application state, cheap to clone per request
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let services = AppServices::new(db.clone(), &config, event_sender.clone())?;

        Ok(Self {
            db,
            config,
            event_sender,
            services,
        })
    }
}

/// Uniform response envelope for API endpoints
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::checkout::payment_instructions,
        handlers::payment_webhooks::bank_transfer_webhook,
    ),
    components(schemas(
        errors::ErrorResponse,
        services::payments::BankTransferNotification,
        services::payments::WebhookAck,
    )),
    tags(
        (name = "checkout", description = "Checkout session endpoints"),
        (name = "payments", description = "Payment reconciliation endpoints"),
    )
)]
struct ApiDoc;

/// Builds the versioned API router
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/products", handlers::products::routes())
        .nest("/carts", handlers::carts::routes())
        .nest("/coupons", handlers::coupons::routes())
        .nest("/checkout", handlers::checkout::routes())
        .nest("/orders", handlers::orders::routes())
        .nest("/payments", handlers::payment_webhooks::routes())
        .route("/openapi.json", get(openapi_spec))
}

/// Top-level application router with health probes
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .nest("/api/v1", api_v1_routes())
}

async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

async fn status() -> impl IntoResponse {
    Json(ApiResponse::<()>::message("ok"))
}

/// Liveness plus a database round trip
async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    db::check_connection(state.db.as_ref()).await?;
    Ok(Json(ApiResponse::<()>::message("healthy")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_carries_data() {
        let response = ApiResponse::success(42);
        assert!(response.success);
        assert_eq!(response.data, Some(42));
        assert!(response.message.is_none());
    }

    #[test]
    fn message_envelope_has_no_data() {
        let response = ApiResponse::<()>::message("ok");
        assert!(response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("ok"));
    }

    #[test]
    fn envelope_serializes_without_null_fields() {
        let json = serde_json::to_string(&ApiResponse::success("x")).unwrap();
        assert!(json.contains("\"data\":\"x\""));
        assert!(!json.contains("\"message\""));
    }
}
