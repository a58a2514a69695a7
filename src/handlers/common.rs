use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::errors::ApiError;
use crate::ApiResponse;

/// Runs DTO validation at the handler boundary so malformed input is
/// rejected with a 400 before it reaches a service.
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(e.to_string()))
}

/// Query parameters shared by all paginated list endpoints
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PaginationParams {
    /// 1-based page number
    pub page: Option<u64>,
    /// Items per page, capped by server configuration
    pub per_page: Option<u64>,
}

impl PaginationParams {
    pub fn resolve(&self, default_per_page: u64, max_per_page: u64) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(default_per_page)
            .clamp(1, max_per_page);
        (page, per_page)
    }
}

/// Envelope for paginated list responses
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        Self {
            items,
            total,
            page,
            per_page,
        }
    }
}

pub fn ok<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

pub fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use rstest::rstest;

    #[derive(Validate)]
    struct QuantityInput {
        #[validate(range(min = 1))]
        quantity: i32,
    }

    #[test]
    fn invalid_input_maps_to_bad_request() {
        let err = validate_input(&QuantityInput { quantity: 0 }).unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        assert!(validate_input(&QuantityInput { quantity: 3 }).is_ok());
    }

    #[rstest]
    #[case(None, None, (1, 20))]
    #[case(Some(0), Some(500), (1, 100))]
    #[case(Some(3), Some(0), (3, 1))]
    #[case(Some(2), None, (2, 20))]
    fn pagination_defaults_and_caps(
        #[case] page: Option<u64>,
        #[case] per_page: Option<u64>,
        #[case] expected: (u64, u64),
    ) {
        let params = PaginationParams { page, per_page };
        assert_eq!(params.resolve(20, 100), expected);
    }
}
