use std::sync::Arc;

use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::checkout::{self, PaymentMethod};
use crate::entities::order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::orders::{FinalizeOutcome, OrderService};

/// Payment reconciliation service.
///
/// Consumes bank transfer notifications, matches them to checkouts via the
/// marker embedded in the transfer description, and hands winners to the
/// order finalizer. The webhook contract is acknowledge-everything: a
/// notification we cannot use is logged and dropped, never bounced, because
/// the upstream relay retries non-2xx responses forever.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    orders: OrderService,
    marker: Regex,
}

/// Inbound bank transfer notification payload
#[derive(Debug, Deserialize, ToSchema)]
pub struct BankTransferNotification {
    /// Free-text transfer description typed by the payer
    pub content: String,
    /// Transferred amount
    pub amount: Decimal,
    /// Upstream transaction reference, if the relay provides one
    #[serde(default)]
    pub reference: Option<String>,
}

/// Webhook acknowledgement body. `success` is always true; the message
/// says what was done with the notification.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
}

impl WebhookAck {
    fn handled(message: impl Into<String>, order_id: Option<Uuid>) -> Self {
        Self {
            success: true,
            message: message.into(),
            order_id,
        }
    }

    fn ignored(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            order_id: None,
        }
    }
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        orders: OrderService,
        transfer_prefix: &str,
    ) -> Result<Self, ServiceError> {
        // Case-insensitive: banks uppercase transfer descriptions
        let pattern = format!(r"(?i){}([0-9a-f]{{32}})", regex::escape(transfer_prefix));
        let marker = Regex::new(&pattern)
            .map_err(|e| ServiceError::InternalError(format!("Invalid marker pattern: {}", e)))?;

        Ok(Self {
            db,
            event_sender,
            orders,
            marker,
        })
    }

    /// Pulls a checkout ID out of a transfer description. The marker is the
    /// configured prefix followed by a dashless UUID, anywhere in the text.
    pub fn extract_checkout_id(&self, content: &str) -> Option<Uuid> {
        self.marker
            .captures(content)
            .and_then(|caps| caps.get(1))
            .and_then(|hex| Uuid::try_parse(hex.as_str()).ok())
    }

    /// Processes a bank transfer notification. Always returns an
    /// acknowledgement; failures are logged, not surfaced.
    #[instrument(skip(self, payload), fields(amount = %payload.amount))]
    pub async fn handle_notification(&self, payload: BankTransferNotification) -> WebhookAck {
        match self.process_notification(&payload).await {
            Ok(ack) => ack,
            Err(ServiceError::InsufficientStock(what)) => {
                // The money arrived but the goods are gone. Needs manual
                // review and a refund, so log loudly and still acknowledge.
                error!(
                    "Paid checkout could not be finalized, out of stock: {}",
                    what
                );
                WebhookAck::ignored("Notification acknowledged")
            }
            Err(e) => {
                error!("Failed to process payment notification: {}", e);
                WebhookAck::ignored("Notification acknowledged")
            }
        }
    }

    async fn process_notification(
        &self,
        payload: &BankTransferNotification,
    ) -> Result<WebhookAck, ServiceError> {
        let checkout_id = match self.extract_checkout_id(&payload.content) {
            Some(id) => id,
            None => {
                self.ignore("No checkout marker in transfer content").await;
                return Ok(WebhookAck::ignored("No checkout marker found"));
            }
        };

        let snapshot = match checkout::Entity::find_by_id(checkout_id)
            .one(self.db.as_ref())
            .await?
        {
            Some(snapshot) => snapshot,
            None => {
                self.ignore(format!("No checkout matches marker {}", checkout_id))
                    .await;
                return Ok(WebhookAck::ignored("Unknown checkout"));
            }
        };

        if snapshot.payment_method != PaymentMethod::BankTransfer {
            self.ignore(format!(
                "Checkout {} is not a bank transfer checkout",
                checkout_id
            ))
            .await;
            return Ok(WebhookAck::ignored("Checkout does not expect a transfer"));
        }

        if snapshot.is_paid {
            // Duplicate delivery of a notification we already consumed
            let existing = order::Entity::find()
                .filter(order::Column::CheckoutId.eq(checkout_id))
                .one(self.db.as_ref())
                .await?;
            info!("Duplicate notification for paid checkout {}", checkout_id);
            return Ok(WebhookAck::handled(
                "Checkout already paid",
                existing.map(|o| o.id),
            ));
        }

        if payload.amount < snapshot.total {
            warn!(
                "Underpaid transfer for checkout {}: got {}, need {}",
                checkout_id, payload.amount, snapshot.total
            );
            self.ignore(format!(
                "Underpaid transfer for checkout {}",
                checkout_id
            ))
            .await;
            // The checkout stays payable; a corrected transfer can still land
            return Ok(WebhookAck::ignored("Transferred amount is insufficient"));
        }

        match self.orders.finalize_checkout(checkout_id).await? {
            FinalizeOutcome::Finalized(created) => {
                self.event_sender
                    .send_or_log(Event::PaymentConfirmed {
                        checkout_id,
                        order_id: created.id,
                        amount: payload.amount,
                    })
                    .await;
                Ok(WebhookAck::handled("Payment confirmed", Some(created.id)))
            }
            FinalizeOutcome::AlreadyPaid(order_id) => Ok(WebhookAck::handled(
                "Checkout already paid",
                order_id,
            )),
        }
    }

    /// Confirms a cash on delivery checkout. The client's word is enough
    /// here since no money moves until the courier arrives; bank transfer
    /// checkouts must come through the webhook instead.
    #[instrument(skip(self))]
    pub async fn confirm_cod(&self, checkout_id: Uuid) -> Result<order::Model, ServiceError> {
        let snapshot = checkout::Entity::find_by_id(checkout_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Checkout with ID {} not found", checkout_id))
            })?;

        if snapshot.payment_method != PaymentMethod::Cod {
            return Err(ServiceError::InvalidOperation(
                "Only cash on delivery checkouts can be confirmed directly".to_string(),
            ));
        }

        match self.orders.finalize_checkout(checkout_id).await? {
            FinalizeOutcome::Finalized(created) => Ok(created),
            FinalizeOutcome::AlreadyPaid(Some(order_id)) => {
                Ok(self.orders.get_order(order_id).await?.order)
            }
            FinalizeOutcome::AlreadyPaid(None) => Err(ServiceError::Conflict(format!(
                "Checkout {} is already being finalized",
                checkout_id
            ))),
        }
    }

    async fn ignore(&self, reason: impl Into<String>) {
        self.event_sender
            .send_or_log(Event::PaymentNotificationIgnored {
                reason: reason.into(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn service_with_prefix(prefix: &str) -> PaymentService {
        let db = Arc::new(DatabaseConnection::default());
        let (tx, _rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let orders = OrderService::new(db.clone(), sender.clone());
        PaymentService::new(db, sender, orders, prefix).unwrap()
    }

    #[test]
    fn extracts_marker_from_noisy_content() {
        let service = service_with_prefix("DH");
        let id = Uuid::new_v4();
        let content = format!("CK NHAN TU 0123456789 DH{} GD 884422", id.simple());
        assert_eq!(service.extract_checkout_id(&content), Some(id));
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        let service = service_with_prefix("DH");
        let id = Uuid::new_v4();
        let content = format!("dh{}", id.simple().to_string().to_uppercase());
        assert_eq!(service.extract_checkout_id(&content), Some(id));
    }

    #[test]
    fn content_without_marker_yields_nothing() {
        let service = service_with_prefix("DH");
        assert_eq!(service.extract_checkout_id("thanks for the coffee"), None);
        // Prefix with too few hex digits after it
        assert_eq!(service.extract_checkout_id("DH1234abcd"), None);
    }

    #[test]
    fn custom_prefix_is_honored() {
        let service = service_with_prefix("PAY-");
        let id = Uuid::new_v4();
        let content = format!("PAY-{}", id.simple());
        assert_eq!(service.extract_checkout_id(&content), Some(id));

        let default_marker = format!("DH{}", id.simple());
        assert_eq!(service.extract_checkout_id(&default_marker), None);
    }
}
