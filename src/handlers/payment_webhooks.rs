use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::debug;

use crate::services::payments::{BankTransferNotification, WebhookAck};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", post(bank_transfer_webhook))
}

/// Receives bank transfer notifications from the upstream relay.
///
/// Always answers 200 with `success: true` so the relay stops retrying;
/// anything we cannot match or use is logged and dropped. The only non-200
/// responses are the 4xx the JSON extractor produces for payloads it
/// cannot even parse into the notification shape.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = BankTransferNotification,
    responses(
        (status = 200, description = "Notification acknowledged", body = WebhookAck),
        (status = 400, description = "Malformed JSON payload"),
        (status = 422, description = "Payload is missing required fields"),
    ),
    tag = "payments"
)]
pub(crate) async fn bank_transfer_webhook(
    State(state): State<AppState>,
    Json(payload): Json<BankTransferNotification>,
) -> Json<WebhookAck> {
    debug!(
        "Received bank transfer notification, reference {:?}",
        payload.reference
    );
    let ack = state.services.payments.handle_notification(payload).await;
    Json(ack)
}
