use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::common;
use crate::services::checkout::CreateCheckoutInput;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_checkout))
        .route("/{id}", get(get_checkout))
        .route("/{id}/qr", get(payment_instructions))
        .route("/{id}/status", get(payment_status))
        .route("/{id}/finalize", post(finalize_checkout))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
struct FinalizeInput {
    /// Client-side claim that an online payment succeeded. Parsed for
    /// compatibility, never trusted: only cash on delivery checkouts may
    /// finalize through this path.
    #[serde(default)]
    #[allow(dead_code)]
    is_online_payment_success: bool,
}

async fn create_checkout(
    State(state): State<AppState>,
    Json(input): Json<CreateCheckoutInput>,
) -> Result<impl IntoResponse, ApiError> {
    common::validate_input(&input)?;
    let details = state.services.checkout.create_checkout(input).await?;
    Ok(common::created(details))
}

async fn get_checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.checkout.get_checkout(id).await?;
    Ok(common::ok(details))
}

/// Returns the bank transfer amount, marker text and QR image URL for a
/// pending bank transfer checkout.
#[utoipa::path(
    get,
    path = "/api/v1/checkout/{id}/qr",
    params(("id" = Uuid, Path, description = "Checkout ID")),
    responses(
        (status = 200, description = "Transfer instructions"),
        (status = 400, description = "Checkout does not expect a transfer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Checkout not found", body = crate::errors::ErrorResponse),
    ),
    tag = "checkout"
)]
pub(crate) async fn payment_instructions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let instructions = state.services.checkout.payment_instructions(id).await?;
    Ok(common::ok(instructions))
}

/// Poll endpoint the storefront hits while waiting for the transfer to land.
async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = state.services.checkout.payment_status(id).await?;
    Ok(common::ok(status))
}

/// Direct finalize path. Restricted to cash on delivery; bank transfer
/// checkouts must be confirmed by the reconciliation webhook.
async fn finalize_checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<FinalizeInput>>,
) -> Result<impl IntoResponse, ServiceError> {
    let _ = body;
    let order = state.services.payments.confirm_cod(id).await?;
    Ok(common::created(order))
}
