use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::checkout::{self, PaymentMethod, PaymentStatus};
use crate::entities::{cart, cart_coupon, cart_item, checkout_item, order};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::carts;

/// Checkout session service. A checkout freezes a cart into an immutable
/// snapshot; the cart itself is deleted in the same transaction so it can
/// never be mutated after the hand-off.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    qr_base_url: String,
    transfer_prefix: String,
}

/// Shipping destination captured at checkout
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub city: String,
    pub postal_code: Option<String>,
    #[validate(length(min = 2, max = 64))]
    pub country: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutInput {
    pub cart_id: Uuid,
    pub customer_id: Uuid,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

/// A checkout with its snapshotted line items
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutDetails {
    #[serde(flatten)]
    pub checkout: checkout::Model,
    pub items: Vec<checkout_item::Model>,
}

/// Bank transfer instructions for a pending checkout
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentInstructions {
    pub checkout_id: Uuid,
    pub amount: Decimal,
    /// Exact text the customer must put in the transfer description.
    /// The reconciliation webhook matches on this marker.
    pub transfer_content: String,
    /// Spaced variant for on-screen display
    pub transfer_content_display: String,
    pub qr_url: String,
}

/// Poll result for the storefront's payment status page
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusView {
    pub checkout_id: Uuid,
    pub payment_status: PaymentStatus,
    pub is_paid: bool,
    pub order_id: Option<Uuid>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        qr_base_url: String,
        transfer_prefix: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            qr_base_url,
            transfer_prefix,
        }
    }

    /// Creates a checkout from a cart. Items, totals and the coupon snapshot
    /// are copied over and the cart is deleted, all in one transaction.
    #[instrument(skip(self, input), fields(cart_id = %input.cart_id))]
    pub async fn create_checkout(
        &self,
        input: CreateCheckoutInput,
    ) -> Result<CheckoutDetails, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let cart = carts::find_cart(&txn, input.cart_id).await?;

        // Re-validate the coupon right before freezing; a stale snapshot
        // must not survive into the checkout
        let (cart_totals, dropped) = carts::refresh_cart_totals(&txn, cart.id).await?;

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Cannot check out an empty cart".to_string(),
            ));
        }

        let snapshot = cart_coupon::Entity::find()
            .filter(cart_coupon::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?;

        let shipping_address = serde_json::to_string(&input.shipping_address)
            .map_err(|e| ServiceError::InternalError(format!("Address encoding failed: {}", e)))?;

        let now = Utc::now();
        let checkout_id = Uuid::new_v4();
        let saved = checkout::ActiveModel {
            id: Set(checkout_id),
            cart_id: Set(cart.id),
            customer_id: Set(input.customer_id),
            shipping_address: Set(shipping_address),
            payment_method: Set(input.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            is_paid: Set(false),
            subtotal: Set(cart_totals.subtotal),
            discount_total: Set(cart_totals.discount_total),
            total: Set(cart_totals.total),
            coupon_code: Set(snapshot.as_ref().map(|s| s.code.clone())),
            coupon_discount_type: Set(snapshot.as_ref().map(|s| s.discount_type)),
            coupon_discount_value: Set(snapshot.as_ref().map(|s| s.discount_value)),
            order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut saved_items = Vec::with_capacity(items.len());
        for item in &items {
            let saved_item = checkout_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                checkout_id: Set(checkout_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                image_url: Set(item.image_url.clone()),
                size: Set(item.size.clone()),
                color: Set(item.color.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(item.line_total),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            saved_items.push(saved_item);
        }

        // The cart is consumed by the checkout
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        cart_coupon::Entity::delete_many()
            .filter(cart_coupon::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        cart::Entity::delete_by_id(cart.id).exec(&txn).await?;

        txn.commit().await?;

        info!("Created checkout {} from cart {}", checkout_id, cart.id);
        if let Some(code) = dropped {
            self.event_sender
                .send_or_log(Event::CouponDropped {
                    cart_id: cart.id,
                    code,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                cart_id: cart.id,
                checkout_id,
            })
            .await;

        Ok(CheckoutDetails {
            checkout: saved,
            items: saved_items,
        })
    }

    pub async fn get_checkout(&self, id: Uuid) -> Result<CheckoutDetails, ServiceError> {
        let checkout = self.find_checkout(id).await?;
        let items = checkout
            .find_related(checkout_item::Entity)
            .all(self.db.as_ref())
            .await?;

        Ok(CheckoutDetails { checkout, items })
    }

    /// Returns bank transfer instructions for a pending checkout. Cash on
    /// delivery checkouts have nothing to transfer.
    pub async fn payment_instructions(
        &self,
        id: Uuid,
    ) -> Result<PaymentInstructions, ServiceError> {
        let checkout = self.find_checkout(id).await?;

        if checkout.payment_method == PaymentMethod::Cod {
            return Err(ServiceError::InvalidOperation(
                "Cash on delivery checkouts have no transfer instructions".to_string(),
            ));
        }
        if checkout.is_paid {
            return Err(ServiceError::InvalidOperation(format!(
                "Checkout {} is already paid",
                id
            )));
        }

        // Simple (dashless) UUID keeps the marker bank-safe: banks strip or
        // mangle punctuation in transfer descriptions
        let transfer_content = format!("{}{}", self.transfer_prefix, checkout.id.simple());
        let transfer_content_display =
            format!("{} {}", self.transfer_prefix, checkout.id.simple());
        let qr_url = format!(
            "{}?amount={}&addInfo={}",
            self.qr_base_url, checkout.total, transfer_content
        );

        Ok(PaymentInstructions {
            checkout_id: checkout.id,
            amount: checkout.total,
            transfer_content,
            transfer_content_display,
            qr_url,
        })
    }

    /// Payment status poll. Falls back to an order lookup for checkouts
    /// finalized before the `order_id` back-reference was written, and to
    /// a provenance lookup when the checkout row itself is gone.
    pub async fn payment_status(&self, id: Uuid) -> Result<PaymentStatusView, ServiceError> {
        let checkout = match checkout::Entity::find_by_id(id).one(self.db.as_ref()).await? {
            Some(checkout) => checkout,
            None => {
                let settled = order::Entity::find()
                    .filter(order::Column::CheckoutId.eq(id))
                    .one(self.db.as_ref())
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Checkout with ID {} not found", id))
                    })?;
                return Ok(PaymentStatusView {
                    checkout_id: id,
                    payment_status: PaymentStatus::Completed,
                    is_paid: true,
                    order_id: Some(settled.id),
                });
            }
        };

        let order_id = match checkout.order_id {
            Some(order_id) => Some(order_id),
            None if checkout.is_paid => order::Entity::find()
                .filter(order::Column::CheckoutId.eq(checkout.id))
                .one(self.db.as_ref())
                .await?
                .map(|o| o.id),
            None => None,
        };

        Ok(PaymentStatusView {
            checkout_id: checkout.id,
            payment_status: checkout.payment_status,
            is_paid: checkout.is_paid,
            order_id,
        })
    }

    async fn find_checkout(&self, id: Uuid) -> Result<checkout::Model, ServiceError> {
        checkout::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Checkout with ID {} not found", id)))
    }
}
