use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::config::AppConfig;
use storefront_api::entities::coupon::{self, DiscountType};
use storefront_api::entities::product;
use storefront_api::events::{self, EventSender};
use storefront_api::services::catalog::CreateProductInput;
use storefront_api::services::coupons::CreateCouponInput;
use storefront_api::{db, AppState};

/// In-process application wired to a throwaway SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _db_dir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir");
        let db_path = db_dir.path().join("test.db");
        let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = db::establish_connection(&database_url)
            .await
            .expect("connect to test database");
        db::run_migrations(&pool).await.expect("run migrations");

        let config = Arc::new(AppConfig::new(
            database_url,
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        ));

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), config, EventSender::new(event_tx))
            .expect("build app state");
        let router = storefront_api::app_routes().with_state(state.clone());

        Self {
            state,
            router,
            _db_dir: db_dir,
        }
    }

    /// Sends a JSON request and returns the status plus the parsed body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                builder
                    .body(Body::from(json.to_string()))
                    .expect("build request")
            }
            None => builder.body(Body::empty()).expect("build request"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("dispatch request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        // Extractor rejections answer with plain-text bodies
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                sku: format!("SKU-{}", Uuid::new_v4().simple()),
                description: None,
                image_url: None,
                price,
                count_in_stock: stock,
            })
            .await
            .expect("seed product")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: Decimal,
        usage_limit: i32,
    ) -> coupon::Model {
        self.state
            .services
            .coupons
            .create_coupon(CreateCouponInput {
                code: code.to_string(),
                discount_type,
                value,
                minimum_order_amount: Decimal::ZERO,
                usage_limit,
                expires_at: Utc::now() + Duration::days(30),
            })
            .await
            .expect("seed coupon")
    }
}

/// Standard shipping address payload for checkout requests.
pub fn shipping_address() -> Value {
    serde_json::json!({
        "full_name": "Pat Doe",
        "phone": "0123456789",
        "line1": "1 Market Street",
        "line2": null,
        "city": "Springfield",
        "postal_code": "12345",
        "country": "US"
    })
}
