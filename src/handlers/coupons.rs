use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{self, PaginatedResponse, PaginationParams};
use crate::services::carts::CartDetails;
use crate::services::coupons::{CreateCouponInput, UpdateCouponInput};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_coupon).get(list_coupons))
        .route("/apply", post(apply_coupon))
        .route("/remove", post(remove_coupon))
        .route("/validate", post(validate_coupon))
        .route(
            "/{id}",
            get(get_coupon).put(update_coupon).delete(delete_coupon),
        )
}

#[derive(Debug, Deserialize, ToSchema)]
struct ValidateCouponInput {
    code: String,
    subtotal: Decimal,
}

/// Identifies the caller's cart by its owner
#[derive(Debug, Deserialize, ToSchema)]
struct CartCouponInput {
    #[serde(default)]
    code: Option<String>,
    customer_id: Option<Uuid>,
    guest_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
struct AppliedCouponResponse {
    code: String,
    discount_amount: Decimal,
    subtotal: Decimal,
    discount_total: Decimal,
    total: Decimal,
}

async fn create_coupon(
    State(state): State<AppState>,
    Json(input): Json<CreateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    common::validate_input(&input)?;
    let coupon = state.services.coupons.create_coupon(input).await?;
    Ok(common::created(coupon))
}

async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupon = state.services.coupons.get_coupon(id).await?;
    Ok(common::ok(coupon))
}

async fn list_coupons(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (page, per_page) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let (items, total) = state.services.coupons.list_coupons(page, per_page).await?;

    Ok(common::ok(PaginatedResponse::new(
        items, total, page, per_page,
    )))
}

async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateCouponInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupon = state.services.coupons.update_coupon(id, input).await?;
    Ok(common::ok(coupon))
}

async fn delete_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.coupons.delete_coupon(id).await?;
    Ok(common::no_content())
}

async fn owner_cart(state: &AppState, input: &CartCouponInput) -> Result<Uuid, ServiceError> {
    state
        .services
        .carts
        .find_cart_for_owner(input.customer_id, input.guest_id.as_deref())
        .await?
        .map(|cart| cart.id)
        .ok_or_else(|| ServiceError::NotFound("No open cart for this owner".to_string()))
}

/// Applies a coupon to the caller's cart and reports the new discount.
async fn apply_coupon(
    State(state): State<AppState>,
    Json(input): Json<CartCouponInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let code = input
        .code
        .as_deref()
        .ok_or_else(|| ServiceError::InvalidInput("A coupon code is required".to_string()))?;
    let cart_id = owner_cart(&state, &input).await?;

    let details = state.services.coupons.apply_to_cart(cart_id, code).await?;
    Ok(common::ok(applied_response(details)?))
}

/// Removes the coupon from the caller's cart.
async fn remove_coupon(
    State(state): State<AppState>,
    Json(input): Json<CartCouponInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart_id = owner_cart(&state, &input).await?;
    let details = state.services.coupons.remove_from_cart(cart_id).await?;
    Ok(common::ok(details))
}

fn applied_response(details: CartDetails) -> Result<AppliedCouponResponse, ServiceError> {
    let snapshot = details.coupon.ok_or_else(|| {
        ServiceError::InternalError("Coupon snapshot missing after apply".to_string())
    })?;

    Ok(AppliedCouponResponse {
        code: snapshot.code,
        discount_amount: snapshot.discount_amount,
        subtotal: details.cart.subtotal,
        discount_total: details.cart.discount_total,
        total: details.cart.total,
    })
}

/// Dry-run validation used by the storefront before the code is applied.
async fn validate_coupon(
    State(state): State<AppState>,
    Json(input): Json<ValidateCouponInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupon = state
        .services
        .coupons
        .validate(&input.code, input.subtotal)
        .await?;
    Ok(common::ok(coupon))
}
