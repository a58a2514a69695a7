use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{cart, cart_coupon, cart_item, coupon, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::coupons::CouponService;

/// Shopping cart service. All mutations end with a totals refresh so the
/// persisted subtotal, discount and total never drift from the line items.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_currency: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCartInput {
    pub customer_id: Option<Uuid>,
    pub guest_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
}

/// A cart with its line items and applied coupon snapshot
#[derive(Debug, Serialize, ToSchema)]
pub struct CartDetails {
    #[serde(flatten)]
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
    pub coupon: Option<cart_coupon::Model>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_currency,
        }
    }

    /// Creates a cart owned by exactly one of a customer or a guest.
    #[instrument(skip(self, input))]
    pub async fn create_cart(&self, input: CreateCartInput) -> Result<cart::Model, ServiceError> {
        match (&input.customer_id, &input.guest_id) {
            (Some(_), Some(_)) => {
                return Err(ServiceError::InvalidInput(
                    "Cart cannot belong to both a customer and a guest".to_string(),
                ))
            }
            (None, None) => {
                return Err(ServiceError::InvalidInput(
                    "Cart must belong to a customer or a guest".to_string(),
                ))
            }
            _ => {}
        }

        if let Some(guest_id) = &input.guest_id {
            if guest_id.trim().is_empty() {
                return Err(ServiceError::InvalidInput(
                    "Guest ID cannot be empty".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(input.customer_id),
            guest_id: Set(input.guest_id),
            currency: Set(self.default_currency.clone()),
            subtotal: Set(Decimal::ZERO),
            discount_total: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let saved = model.insert(self.db.as_ref()).await?;
        info!("Created cart {}", saved.id);
        self.event_sender
            .send_or_log(Event::CartCreated(saved.id))
            .await;

        Ok(saved)
    }

    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartDetails, ServiceError> {
        load_cart_details(self.db.as_ref(), cart_id).await
    }

    /// Looks up the cart for a given owner. Returns `None` when the owner
    /// has no open cart.
    pub async fn find_cart_for_owner(
        &self,
        customer_id: Option<Uuid>,
        guest_id: Option<&str>,
    ) -> Result<Option<cart::Model>, ServiceError> {
        let query = match (customer_id, guest_id) {
            (Some(customer_id), None) => {
                cart::Entity::find().filter(cart::Column::CustomerId.eq(customer_id))
            }
            (None, Some(guest_id)) => {
                cart::Entity::find().filter(cart::Column::GuestId.eq(guest_id))
            }
            _ => {
                return Err(ServiceError::InvalidInput(
                    "Specify exactly one of customer_id or guest_id".to_string(),
                ))
            }
        };

        Ok(query.one(self.db.as_ref()).await?)
    }

    /// Adds a product to the cart, merging with an existing line when the
    /// product and its variant options match. Product name, image and price
    /// are snapshotted at add time.
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartDetails, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let cart = find_cart(&txn, cart_id).await?;

        let product = product::Entity::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product with ID {} not found", input.product_id))
            })?;
        if !product.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Product {} is no longer available",
                product.name
            )));
        }

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .filter(match &input.size {
                Some(size) => cart_item::Column::Size.eq(size.clone()),
                None => cart_item::Column::Size.is_null(),
            })
            .filter(match &input.color {
                Some(color) => cart_item::Column::Color.eq(color.clone()),
                None => cart_item::Column::Color.is_null(),
            })
            .one(&txn)
            .await?;

        let requested = existing.as_ref().map_or(0, |item| item.quantity) + input.quantity;
        if product.count_in_stock < requested {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} left in stock",
                product.count_in_stock, product.name
            )));
        }

        let now = Utc::now();
        match existing {
            Some(item) => {
                let unit_price = item.unit_price;
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(requested);
                active.line_total = Set(unit_price * Decimal::from(requested));
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    product_name: Set(product.name.clone()),
                    image_url: Set(product.image_url.clone()),
                    size: Set(input.size),
                    color: Set(input.color),
                    quantity: Set(input.quantity),
                    unit_price: Set(product.price),
                    line_total: Set(product.price * Decimal::from(input.quantity)),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                item.insert(&txn).await?;
            }
        }

        let (_, dropped) = refresh_cart_totals(&txn, cart.id).await?;
        txn.commit().await?;

        self.notify_dropped_coupon(cart.id, dropped).await;
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: product.id,
            })
            .await;

        load_cart_details(self.db.as_ref(), cart.id).await
    }

    /// Sets the quantity of a line item. A quantity of zero removes it.
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartDetails, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".to_string(),
            ));
        }
        if quantity == 0 {
            return self.remove_item(cart_id, item_id).await;
        }

        let txn = self.db.begin().await?;

        let item = find_cart_item(&txn, cart_id, item_id).await?;

        let product = product::Entity::find_by_id(item.product_id).one(&txn).await?;
        if let Some(product) = &product {
            if product.count_in_stock < quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} of {} left in stock",
                    product.count_in_stock, product.name
                )));
            }
        }

        let unit_price = item.unit_price;
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.line_total = Set(unit_price * Decimal::from(quantity));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let (_, dropped) = refresh_cart_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.notify_dropped_coupon(cart_id, dropped).await;
        self.event_sender
            .send_or_log(Event::CartItemUpdated { cart_id, item_id })
            .await;

        load_cart_details(self.db.as_ref(), cart_id).await
    }

    pub async fn remove_item(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartDetails, ServiceError> {
        let txn = self.db.begin().await?;

        let item = find_cart_item(&txn, cart_id, item_id).await?;
        item.delete(&txn).await?;

        let (_, dropped) = refresh_cart_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.notify_dropped_coupon(cart_id, dropped).await;
        self.event_sender
            .send_or_log(Event::CartItemRemoved { cart_id, item_id })
            .await;

        load_cart_details(self.db.as_ref(), cart_id).await
    }

    /// Removes every line item and any applied coupon.
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<CartDetails, ServiceError> {
        let txn = self.db.begin().await?;

        find_cart(&txn, cart_id).await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;
        cart_coupon::Entity::delete_many()
            .filter(cart_coupon::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        refresh_cart_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart_id))
            .await;

        load_cart_details(self.db.as_ref(), cart_id).await
    }

    /// Folds a guest cart into the customer's cart after sign-in. Matching
    /// lines are merged by quantity, the guest cart is deleted, and the
    /// customer cart keeps its own coupon if one is applied.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(
        &self,
        guest_id: &str,
        customer_id: Uuid,
    ) -> Result<CartDetails, ServiceError> {
        let txn = self.db.begin().await?;

        let guest_cart = cart::Entity::find()
            .filter(cart::Column::GuestId.eq(guest_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No cart found for guest {}", guest_id))
            })?;

        let customer_cart = match cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
        {
            Some(cart) => cart,
            None => {
                let now = Utc::now();
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    customer_id: Set(Some(customer_id)),
                    guest_id: Set(None),
                    currency: Set(guest_cart.currency.clone()),
                    subtotal: Set(Decimal::ZERO),
                    discount_total: Set(Decimal::ZERO),
                    total: Set(Decimal::ZERO),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        let guest_items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .all(&txn)
            .await?;
        let customer_items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(customer_cart.id))
            .all(&txn)
            .await?;

        let now = Utc::now();
        for guest_item in guest_items {
            let target = customer_items.iter().find(|item| {
                item.product_id == guest_item.product_id
                    && item.size == guest_item.size
                    && item.color == guest_item.color
            });

            match target {
                Some(item) => {
                    let quantity = item.quantity + guest_item.quantity;
                    let unit_price = item.unit_price;
                    let mut active: cart_item::ActiveModel = item.clone().into();
                    active.quantity = Set(quantity);
                    active.line_total = Set(unit_price * Decimal::from(quantity));
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                    guest_item.delete(&txn).await?;
                }
                None => {
                    let mut active: cart_item::ActiveModel = guest_item.into();
                    active.cart_id = Set(customer_cart.id);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
            }
        }

        // The guest cart's coupon does not follow the items over
        cart_coupon::Entity::delete_many()
            .filter(cart_coupon::Column::CartId.eq(guest_cart.id))
            .exec(&txn)
            .await?;
        let guest_cart_id = guest_cart.id;
        guest_cart.delete(&txn).await?;

        let (_, dropped) = refresh_cart_totals(&txn, customer_cart.id).await?;
        txn.commit().await?;

        self.notify_dropped_coupon(customer_cart.id, dropped).await;
        self.event_sender
            .send_or_log(Event::CartsMerged {
                guest_cart_id,
                customer_cart_id: customer_cart.id,
            })
            .await;

        load_cart_details(self.db.as_ref(), customer_cart.id).await
    }

    async fn notify_dropped_coupon(&self, cart_id: Uuid, dropped: Option<String>) {
        if let Some(code) = dropped {
            self.event_sender
                .send_or_log(Event::CouponDropped { cart_id, code })
                .await;
        }
    }
}

pub(crate) async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    cart::Entity::find_by_id(cart_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart with ID {} not found", cart_id)))
}

async fn find_cart_item<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    item_id: Uuid,
) -> Result<cart_item::Model, ServiceError> {
    cart_item::Entity::find_by_id(item_id)
        .filter(cart_item::Column::CartId.eq(cart_id))
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Cart item {} not found in cart {}", item_id, cart_id))
        })
}

pub(crate) async fn load_cart_details(
    conn: &DatabaseConnection,
    cart_id: Uuid,
) -> Result<CartDetails, ServiceError> {
    let cart = find_cart(conn, cart_id).await?;
    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .all(conn)
        .await?;
    let coupon = cart_coupon::Entity::find()
        .filter(cart_coupon::Column::CartId.eq(cart_id))
        .one(conn)
        .await?;

    Ok(CartDetails {
        cart,
        items,
        coupon,
    })
}

/// Recomputes the cart's subtotal, re-validates the applied coupon against
/// the new subtotal, and persists the refreshed figures. A coupon that no
/// longer qualifies is silently dropped; the dropped code is returned so
/// callers can emit an event for it.
pub(crate) async fn refresh_cart_totals<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<(cart::Model, Option<String>), ServiceError> {
    let cart = find_cart(conn, cart_id).await?;

    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .all(conn)
        .await?;
    let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();

    let snapshot = cart_coupon::Entity::find()
        .filter(cart_coupon::Column::CartId.eq(cart_id))
        .one(conn)
        .await?;

    let mut discount_total = Decimal::ZERO;
    let mut dropped = None;

    if let Some(snapshot) = snapshot {
        let ledger_entry = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(snapshot.code.clone()))
            .one(conn)
            .await?;

        let still_valid = ledger_entry
            .as_ref()
            .map(|entry| CouponService::check_redeemable(entry, subtotal, Utc::now()).is_ok())
            .unwrap_or(false);

        if still_valid {
            let amount = CouponService::calculate_discount(
                snapshot.discount_type,
                snapshot.discount_value,
                subtotal,
            );
            discount_total = amount;
            if amount != snapshot.discount_amount {
                let mut active: cart_coupon::ActiveModel = snapshot.into();
                active.discount_amount = Set(amount);
                active.update(conn).await?;
            }
        } else {
            dropped = Some(snapshot.code.clone());
            snapshot.delete(conn).await?;
        }
    }

    let mut active: cart::ActiveModel = cart.into();
    active.subtotal = Set(subtotal);
    active.discount_total = Set(discount_total);
    active.total = Set(subtotal - discount_total);
    active.updated_at = Set(Utc::now());
    let updated = active.update(conn).await?;

    Ok((updated, dropped))
}
