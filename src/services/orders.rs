use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::checkout::{self, PaymentMethod, PaymentStatus};
use crate::entities::order::{self, OrderStatus};
use crate::entities::{checkout_item, order_item, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::coupons::CouponService;

/// Order finalizer and order lifecycle service.
///
/// Finalization is the only write path that touches stock, coupon usage and
/// the checkout's `is_paid` flag, and it does all three in one transaction.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

/// Result of attempting to finalize a checkout
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// This caller won the flip and created the order
    Finalized(order::Model),
    /// Another caller already finalized this checkout
    AlreadyPaid(Option<Uuid>),
}

/// An order with its line items
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Finalizes a checkout into an order.
    ///
    /// The conditional flip of `is_paid` is the first statement in the
    /// transaction. Exactly one concurrent caller can move it from false to
    /// true; everyone else observes zero affected rows and backs off. If any
    /// later step fails the rollback also reverts the flip, so the checkout
    /// stays payable.
    #[instrument(skip(self))]
    pub async fn finalize_checkout(
        &self,
        checkout_id: Uuid,
    ) -> Result<FinalizeOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let flipped = checkout::Entity::update_many()
            .col_expr(checkout::Column::IsPaid, Expr::value(true))
            .filter(checkout::Column::Id.eq(checkout_id))
            .filter(checkout::Column::IsPaid.eq(false))
            .exec(&txn)
            .await?;

        if flipped.rows_affected == 0 {
            txn.rollback().await?;
            let existing = order::Entity::find()
                .filter(order::Column::CheckoutId.eq(checkout_id))
                .one(self.db.as_ref())
                .await?;
            info!("Checkout {} already finalized", checkout_id);
            return Ok(FinalizeOutcome::AlreadyPaid(existing.map(|o| o.id)));
        }

        let snapshot = checkout::Entity::find_by_id(checkout_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Checkout with ID {} not found", checkout_id))
            })?;
        let items = snapshot
            .find_related(checkout_item::Entity)
            .all(&txn)
            .await?;

        for item in &items {
            decrement_stock(&txn, item).await?;
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let saved = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(order_id)),
            checkout_id: Set(checkout_id),
            customer_id: Set(snapshot.customer_id),
            status: Set(OrderStatus::AwaitingConfirmation),
            payment_method: Set(snapshot.payment_method),
            // Cash on delivery is collected by the courier, so the order
            // starts unpaid even though the checkout is consumed
            is_paid: Set(snapshot.payment_method == PaymentMethod::BankTransfer),
            shipping_address: Set(snapshot.shipping_address.clone()),
            subtotal: Set(snapshot.subtotal),
            discount_total: Set(snapshot.discount_total),
            total_amount: Set(snapshot.total),
            coupon_code: Set(snapshot.coupon_code.clone()),
            coupon_discount_type: Set(snapshot.coupon_discount_type),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for item in &items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
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
        }

        if let Some(code) = &snapshot.coupon_code {
            CouponService::redeem(&txn, code).await?;
        }

        let mut active: checkout::ActiveModel = snapshot.clone().into();
        active.order_id = Set(Some(order_id));
        active.payment_status = Set(PaymentStatus::Completed);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;

        info!(
            "Finalized checkout {} into order {} ({})",
            checkout_id, order_id, saved.order_number
        );
        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        if let Some(code) = snapshot.coupon_code {
            self.event_sender
                .send_or_log(Event::CouponRedeemed { order_id, code })
                .await;
        }

        Ok(FinalizeOutcome::Finalized(saved))
    }

    pub async fn get_order(&self, id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = order::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {} not found", id)))?;
        let items = order
            .find_related(order_item::Entity)
            .all(self.db.as_ref())
            .await?;

        Ok(OrderDetails { order, items })
    }

    pub async fn get_order_by_checkout(
        &self,
        checkout_id: Uuid,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::CheckoutId.eq(checkout_id))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page.max(1));

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((items, total))
    }

    /// Moves an order through its fulfillment lifecycle. Delivery stamps
    /// `delivered_at` and settles cash on delivery orders.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {} not found", id)))?;

        let old_status = order.status;
        if !can_transition(old_status, new_status) {
            warn!(
                "Rejected order {} transition {:?} -> {:?}",
                id, old_status, new_status
            );
            return Err(ServiceError::InvalidOperation(format!(
                "Order cannot move from {:?} to {:?}",
                old_status, new_status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        if new_status == OrderStatus::Delivered {
            active.delivered_at = Set(Some(Utc::now()));
            active.is_paid = Set(true);
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(self.db.as_ref()).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: id,
                old_status: format!("{:?}", old_status),
                new_status: format!("{:?}", new_status),
            })
            .await;

        Ok(updated)
    }
}

/// Guarded stock decrement. The `count_in_stock >= quantity` filter makes
/// the decrement and the availability check one atomic statement; zero
/// affected rows means another order took the stock first.
async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    item: &checkout_item::Model,
) -> Result<(), ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::CountInStock,
            Expr::col(product::Column::CountInStock).sub(item.quantity),
        )
        .col_expr(
            product::Column::Sold,
            Expr::col(product::Column::Sold).add(item.quantity),
        )
        .filter(product::Column::Id.eq(item.product_id))
        .filter(product::Column::CountInStock.gte(item.quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(item.product_name.clone()));
    }
    Ok(())
}

fn generate_order_number(order_id: Uuid) -> String {
    let simple = order_id.simple().to_string();
    format!(
        "ORD-{}-{}",
        Utc::now().format("%Y%m%d"),
        &simple[..8].to_uppercase()
    )
}

/// Fulfillment state machine. Terminal states have no exits.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (AwaitingConfirmation, Processing)
            | (AwaitingConfirmation, Cancelled)
            | (Processing, Shipped)
            | (Processing, Cancelled)
            | (Shipped, Delivered)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use OrderStatus::*;

    #[test_case(AwaitingConfirmation, Processing => true; "confirmation")]
    #[test_case(Processing, Shipped => true; "shipment")]
    #[test_case(Shipped, Delivered => true; "delivery")]
    #[test_case(AwaitingConfirmation, Cancelled => true; "early cancel")]
    #[test_case(Processing, Cancelled => true; "cancel before shipment")]
    #[test_case(Shipped, Cancelled => false; "no cancel after shipment")]
    #[test_case(AwaitingConfirmation, Shipped => false; "no skipping stages")]
    #[test_case(AwaitingConfirmation, Delivered => false; "no jump to delivered")]
    #[test_case(Processing, AwaitingConfirmation => false; "no rewinding")]
    #[test_case(Shipped, Processing => false; "no unshipping")]
    fn fulfillment_transitions(from: OrderStatus, to: OrderStatus) -> bool {
        can_transition(from, to)
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in [AwaitingConfirmation, Processing, Shipped, Delivered, Cancelled] {
            assert!(!can_transition(Delivered, to));
            assert!(!can_transition(Cancelled, to));
        }
    }

    #[test]
    fn order_numbers_embed_date_and_id_fragment() {
        let id = Uuid::new_v4();
        let number = generate_order_number(id);
        assert!(number.starts_with("ORD-"));
        assert!(number.len() > "ORD-YYYYMMDD-".len());
    }
}
