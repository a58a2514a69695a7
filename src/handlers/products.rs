use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{self, PaginatedResponse, PaginationParams};
use crate::services::catalog::CreateProductInput;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/{id}", get(get_product))
}

async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    common::validate_input(&input)?;
    let product = state.services.catalog.create_product(input).await?;
    Ok(common::created(product))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(common::ok(product))
}

async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (page, per_page) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let (items, total) = state.services.catalog.list_products(page, per_page).await?;

    Ok(common::ok(PaginatedResponse::new(
        items, total, page, per_page,
    )))
}
