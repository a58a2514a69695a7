mod common;

use axum::http::{Method, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{shipping_address, TestApp};
use storefront_api::entities::coupon::DiscountType;
use storefront_api::services::orders::FinalizeOutcome;

/// Money fields serialize as strings; the stored scale depends on the
/// backend, so compare them as decimals.
fn money(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

async fn cart_with_item(
    app: &TestApp,
    customer_id: Uuid,
    product_id: &str,
    quantity: i32,
) -> String {
    let (status, body) = app
        .post("/api/v1/carts", json!({ "customer_id": customer_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let cart_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(
            &format!("/api/v1/carts/{}/items", cart_id),
            json!({ "product_id": product_id, "quantity": quantity }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    cart_id
}

async fn create_checkout(app: &TestApp, cart_id: &str, payment_method: &str) -> Value {
    let (status, body) = app
        .post(
            "/api/v1/checkout",
            json!({
                "cart_id": cart_id,
                "customer_id": Uuid::new_v4(),
                "shipping_address": shipping_address(),
                "payment_method": payment_method
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "checkout failed: {}", body);
    body["data"].clone()
}

fn transfer_content(checkout_id: &str) -> String {
    format!("DH{}", checkout_id.replace('-', ""))
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn bank_transfer_flow_creates_exactly_one_order() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Blue Hoodie", dec!(40), 10).await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), 5)
        .await;

    let customer_id = Uuid::new_v4();
    let cart_id = cart_with_item(&app, customer_id, &product.id.to_string(), 2).await;

    let (status, body) = app
        .post(
            "/api/v1/coupons/apply",
            json!({ "code": "save10", "customer_id": customer_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["code"], json!("SAVE10"));
    assert_eq!(money(&body["data"]["discount_amount"]), dec!(8));
    assert_eq!(money(&body["data"]["total"]), dec!(72));

    let checkout = create_checkout(&app, &cart_id, "bank_transfer").await;
    let checkout_id = checkout["id"].as_str().unwrap();

    // The cart is consumed by the checkout
    let (status, _) = app.get(&format!("/api/v1/carts/{}", cart_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .get(&format!("/api/v1/checkout/{}/qr", checkout_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let content = body["data"]["transfer_content"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(content, transfer_content(checkout_id));
    assert!(body["data"]["qr_url"].as_str().unwrap().contains(&content));

    let (status, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({ "content": format!("CK GD 884 {}", content), "amount": "72.0000" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], json!(true));
    let order_id = ack["order_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .get(&format!("/api/v1/checkout/{}/status", checkout_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_paid"], json!(true));
    assert_eq!(body["data"]["payment_status"], json!("completed"));
    assert_eq!(body["data"]["order_id"], json!(order_id));

    let (status, body) = app.get(&format!("/api/v1/orders/{}", order_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("awaiting_confirmation"));
    assert_eq!(money(&body["data"]["total_amount"]), dec!(72));
    assert_eq!(body["data"]["is_paid"], json!(true));
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    // Stock and coupon usage were consumed once
    let refreshed = app
        .state
        .services
        .catalog
        .get_product(product.id)
        .await
        .unwrap();
    assert_eq!(refreshed.count_in_stock, 8);
    assert_eq!(refreshed.sold, 2);
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn duplicate_webhook_is_idempotent() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Desk Lamp", dec!(25), 5).await;

    let cart_id = cart_with_item(&app, Uuid::new_v4(), &product.id.to_string(), 1).await;
    let checkout = create_checkout(&app, &cart_id, "bank_transfer").await;
    let checkout_id = checkout["id"].as_str().unwrap();

    let payload = json!({
        "content": transfer_content(checkout_id),
        "amount": "25.0000"
    });

    let (_, first) = app
        .post("/api/v1/payments/webhook", payload.clone())
        .await;
    let (status, second) = app.post("/api/v1/payments/webhook", payload).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success"], json!(true));
    assert_eq!(first["order_id"], second["order_id"]);

    let refreshed = app
        .state
        .services
        .catalog
        .get_product(product.id)
        .await
        .unwrap();
    assert_eq!(refreshed.count_in_stock, 4);
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn webhook_without_marker_is_acknowledged() {
    let app = TestApp::spawn().await;

    let (status, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({ "content": "coffee money, thanks", "amount": "5.00" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], json!(true));
    assert!(ack.get("order_id").is_none());
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn malformed_webhook_payload_is_rejected() {
    let app = TestApp::spawn().await;

    // A payload that cannot even parse into the notification shape is the
    // one case that does not get a 200
    let (status, body) = app
        .post("/api/v1/payments/webhook", json!({ "content": 17 }))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    // The extractor's rejection body is plain text, not JSON
    assert!(body.is_string());
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn underpaid_transfer_leaves_checkout_payable() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Keyboard", dec!(80), 3).await;

    let cart_id = cart_with_item(&app, Uuid::new_v4(), &product.id.to_string(), 1).await;
    let checkout = create_checkout(&app, &cart_id, "bank_transfer").await;
    let checkout_id = checkout["id"].as_str().unwrap();

    let (status, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({ "content": transfer_content(checkout_id), "amount": "79.99" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], json!(true));
    assert!(ack.get("order_id").is_none());

    let (_, body) = app
        .get(&format!("/api/v1/checkout/{}/status", checkout_id))
        .await;
    assert_eq!(body["data"]["is_paid"], json!(false));
    assert_eq!(body["data"]["payment_status"], json!("pending"));

    // A corrected transfer still lands
    let (_, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({ "content": transfer_content(checkout_id), "amount": "80.0000" }),
        )
        .await;
    assert!(ack["order_id"].as_str().is_some());
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn concurrent_finalizes_create_exactly_one_order() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Last Unit", dec!(50), 1).await;

    let cart_id = cart_with_item(&app, Uuid::new_v4(), &product.id.to_string(), 1).await;
    let checkout = create_checkout(&app, &cart_id, "bank_transfer").await;
    let checkout_id: Uuid = checkout["id"].as_str().unwrap().parse().unwrap();

    // Two racing finalizers: only one can win the paid flip
    let orders = &app.state.services.orders;
    let (first, second) = tokio::join!(
        orders.finalize_checkout(checkout_id),
        orders.finalize_checkout(checkout_id)
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    let finalized = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, FinalizeOutcome::Finalized(_)))
        .count();
    assert_eq!(finalized, 1);

    let settled = orders.get_order_by_checkout(checkout_id).await.unwrap();
    assert!(settled.is_some());

    // The single unit was decremented exactly once
    let refreshed = app
        .state
        .services
        .catalog
        .get_product(product.id)
        .await
        .unwrap();
    assert_eq!(refreshed.count_in_stock, 0);
    assert_eq!(refreshed.sold, 1);
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn oversold_checkout_is_acknowledged_but_not_finalized() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Limited Print", dec!(100), 1).await;

    // Two checkouts race for the single unit
    let first_cart = cart_with_item(&app, Uuid::new_v4(), &product.id.to_string(), 1).await;
    let second_cart = cart_with_item(&app, Uuid::new_v4(), &product.id.to_string(), 1).await;
    let first = create_checkout(&app, &first_cart, "bank_transfer").await;
    let second = create_checkout(&app, &second_cart, "bank_transfer").await;
    let first_id = first["id"].as_str().unwrap();
    let second_id = second["id"].as_str().unwrap();

    let (_, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({ "content": transfer_content(first_id), "amount": "100.0000" }),
        )
        .await;
    assert!(ack["order_id"].as_str().is_some());

    // The loser's money arrived but the stock is gone: acknowledged,
    // no order, checkout rolled back to payable for manual handling
    let (status, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({ "content": transfer_content(second_id), "amount": "100.0000" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], json!(true));
    assert!(ack.get("order_id").is_none());

    let (_, body) = app
        .get(&format!("/api/v1/checkout/{}/status", second_id))
        .await;
    assert_eq!(body["data"]["is_paid"], json!(false));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn cod_checkout_finalizes_directly() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Mug", dec!(12), 4).await;

    let cart_id = cart_with_item(&app, Uuid::new_v4(), &product.id.to_string(), 2).await;
    let checkout = create_checkout(&app, &cart_id, "cod").await;
    let checkout_id = checkout["id"].as_str().unwrap();

    // COD checkouts have nothing to transfer
    let (status, _) = app
        .get(&format!("/api/v1/checkout/{}/qr", checkout_id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            &format!("/api/v1/checkout/{}/finalize", checkout_id),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    // Cash is collected at the door, so the order starts unpaid
    assert_eq!(body["data"]["is_paid"], json!(false));
    assert_eq!(body["data"]["status"], json!("awaiting_confirmation"));

    let refreshed = app
        .state
        .services
        .catalog
        .get_product(product.id)
        .await
        .unwrap();
    assert_eq!(refreshed.count_in_stock, 2);
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn bank_transfer_checkout_rejects_direct_finalize() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Poster", dec!(15), 3).await;

    let cart_id = cart_with_item(&app, Uuid::new_v4(), &product.id.to_string(), 1).await;
    let checkout = create_checkout(&app, &cart_id, "bank_transfer").await;
    let checkout_id = checkout["id"].as_str().unwrap();

    // The client-supplied success flag cannot authorize a non-COD finalize
    let (status, _) = app
        .post(
            &format!("/api/v1/checkout/{}/finalize", checkout_id),
            json!({ "is_online_payment_success": true }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app
        .get(&format!("/api/v1/checkout/{}/status", checkout_id))
        .await;
    assert_eq!(body["data"]["is_paid"], json!(false));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn empty_cart_cannot_check_out() {
    let app = TestApp::spawn().await;

    let (_, body) = app
        .post("/api/v1/carts", json!({ "guest_id": "guest-123" }))
        .await;
    let cart_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(
            "/api/v1/checkout",
            json!({
                "cart_id": cart_id,
                "customer_id": Uuid::new_v4(),
                "shipping_address": shipping_address(),
                "payment_method": "cod"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn coupon_usage_limit_blocks_the_last_redeemer() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Socks", dec!(10), 10).await;
    app.seed_coupon("LAST1", DiscountType::Fixed, dec!(2), 1)
        .await;

    let first_customer = Uuid::new_v4();
    let second_customer = Uuid::new_v4();
    let first_cart = cart_with_item(&app, first_customer, &product.id.to_string(), 1).await;
    let second_cart = cart_with_item(&app, second_customer, &product.id.to_string(), 1).await;

    for customer_id in [first_customer, second_customer] {
        let (status, _) = app
            .post(
                "/api/v1/coupons/apply",
                json!({ "code": "LAST1", "customer_id": customer_id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let first = create_checkout(&app, &first_cart, "bank_transfer").await;
    let second = create_checkout(&app, &second_cart, "bank_transfer").await;

    let (_, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({
                "content": transfer_content(first["id"].as_str().unwrap()),
                "amount": "8.0000"
            }),
        )
        .await;
    assert!(ack["order_id"].as_str().is_some());

    // The second redeem hits the exhausted coupon inside the finalizer;
    // the whole finalize rolls back and the checkout stays payable
    let second_id = second["id"].as_str().unwrap();
    let (status, ack) = app
        .post(
            "/api/v1/payments/webhook",
            json!({ "content": transfer_content(second_id), "amount": "8.0000" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], json!(true));
    assert!(ack.get("order_id").is_none());

    let (_, body) = app
        .get(&format!("/api/v1/checkout/{}/status", second_id))
        .await;
    assert_eq!(body["data"]["is_paid"], json!(false));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn stale_coupon_is_dropped_when_cart_shrinks() {
    let app = TestApp::spawn().await;
    let product = app.seed_product("Jacket", dec!(60), 5).await;
    let coupon = app
        .seed_coupon("BIG50", DiscountType::Fixed, dec!(5), 10)
        .await;

    // Raise the minimum so the coupon only fits the two-item cart
    app.state
        .services
        .coupons
        .update_coupon(
            coupon.id,
            storefront_api::services::coupons::UpdateCouponInput {
                minimum_order_amount: Some(dec!(100)),
                usage_limit: None,
                is_active: None,
                expires_at: None,
            },
        )
        .await
        .unwrap();

    let customer_id = Uuid::new_v4();
    let cart_id = cart_with_item(&app, customer_id, &product.id.to_string(), 2).await;

    let (status, _) = app
        .post(
            "/api/v1/coupons/apply",
            json!({ "code": "BIG50", "customer_id": customer_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Shrinking the cart below the minimum drops the coupon
    let (_, body) = app.get(&format!("/api/v1/carts/{}", cart_id)).await;
    let item_id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/carts/{}/items/{}", cart_id, item_id),
            Some(json!({ "quantity": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["coupon"].is_null());
    assert_eq!(money(&body["data"]["discount_total"]), dec!(0));
    assert_eq!(money(&body["data"]["total"]), dec!(60));
}
