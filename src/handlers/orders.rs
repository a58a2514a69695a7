use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::handlers::common::{self, PaginatedResponse, PaginationParams};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/{id}", get(get_order))
        .route("/{id}/status", put(update_status))
}

// Kept flat: the query deserializer cannot see through serde(flatten)
#[derive(Debug, Deserialize)]
struct ListOrdersQuery {
    customer_id: Uuid,
    page: Option<u64>,
    per_page: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
struct UpdateStatusInput {
    status: OrderStatus,
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.orders.get_order(id).await?;
    Ok(common::ok(details))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let pagination = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };
    let (page, per_page) = pagination.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let (items, total) = state
        .services
        .orders
        .list_for_customer(query.customer_id, page, per_page)
        .await?;

    Ok(common::ok(PaginatedResponse::new(
        items, total, page, per_page,
    )))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateStatusInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.update_status(id, input.status).await?;
    Ok(common::ok(order))
}
