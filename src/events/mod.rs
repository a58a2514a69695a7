use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing when the channel is closed.
    /// Used from request paths where event delivery is best-effort.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("Failed to dispatch event: {}", e);
        }
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Catalog events
    ProductCreated(Uuid),

    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, item_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),
    CartsMerged { guest_cart_id: Uuid, customer_cart_id: Uuid },

    // Coupon events
    CouponCreated(Uuid),
    CouponApplied { cart_id: Uuid, code: String },
    CouponRemoved { cart_id: Uuid },
    CouponDropped { cart_id: Uuid, code: String },
    CouponRedeemed { order_id: Uuid, code: String },

    // Checkout events
    CheckoutStarted { cart_id: Uuid, checkout_id: Uuid },

    // Payment events
    PaymentConfirmed { checkout_id: Uuid, order_id: Uuid, amount: Decimal },
    PaymentNotificationIgnored { reason: String },

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

// Function to process incoming events. This service logs them for audit
// purposes; downstream consumers can be attached here later.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentNotificationIgnored { reason } => {
                warn!("Payment notification ignored: {}", reason);
            }
            Event::PaymentConfirmed {
                checkout_id,
                order_id,
                amount,
            } => {
                info!(
                    "Payment confirmed for checkout {}: order {} ({})",
                    checkout_id, order_id, amount
                );
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
