use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::common;
use crate::services::carts::{AddItemInput, CreateCartInput};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cart).get(find_cart))
        .route("/merge", post(merge_carts))
        .route("/{id}", get(get_cart))
        .route("/{id}/items", post(add_item))
        .route("/{id}/items/{item_id}", put(update_item).delete(remove_item))
        .route("/{id}/clear", post(clear_cart))
}

#[derive(Debug, Deserialize)]
struct OwnerQuery {
    customer_id: Option<Uuid>,
    guest_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
struct UpdateQuantityInput {
    quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
struct MergeCartsInput {
    guest_id: String,
    customer_id: Uuid,
}

async fn create_cart(
    State(state): State<AppState>,
    Json(input): Json<CreateCartInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.create_cart(input).await?;
    Ok(common::created(cart))
}

async fn get_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.carts.get_cart(id).await?;
    Ok(common::ok(details))
}

/// Looks up the open cart for a customer or a guest session.
async fn find_cart(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .find_cart_for_owner(query.customer_id, query.guest_id.as_deref())
        .await?
        .ok_or_else(|| ServiceError::NotFound("No open cart for this owner".to_string()))?;

    Ok(common::ok(cart))
}

async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<AddItemInput>,
) -> Result<impl IntoResponse, ApiError> {
    common::validate_input(&input)?;
    let details = state.services.carts.add_item(id, input).await?;
    Ok(common::ok(details))
}

async fn update_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateQuantityInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .carts
        .update_item_quantity(id, item_id, input.quantity)
        .await?;
    Ok(common::ok(details))
}

async fn remove_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.carts.remove_item(id, item_id).await?;
    Ok(common::ok(details))
}

async fn clear_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.carts.clear_cart(id).await?;
    Ok(common::ok(details))
}

async fn merge_carts(
    State(state): State<AppState>,
    Json(input): Json<MergeCartsInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .carts
        .merge_guest_cart(&input.guest_id, input.customer_id)
        .await?;
    Ok(common::ok(details))
}
