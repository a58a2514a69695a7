use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::coupon::{self, DiscountType};
use crate::entities::{cart, cart_coupon};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::carts::{self, CartDetails};

/// Coupon ledger service. Validation and discount math live here;
/// `used_count` is only incremented through [`CouponService::redeem`],
/// which the order finalizer calls inside its transaction.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCouponInput {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    #[serde(default)]
    pub minimum_order_amount: Decimal,
    #[validate(range(min = 1))]
    pub usage_limit: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCouponInput {
    pub minimum_order_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Codes are stored uppercase; lookups normalize so `save10` finds `SAVE10`.
fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Checks whether a coupon can be redeemed against the given subtotal.
    /// Inactive coupons are reported as not found so probing cannot tell a
    /// disabled code from a nonexistent one.
    pub fn check_redeemable(
        entry: &coupon::Model,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if !entry.is_active {
            return Err(ServiceError::CouponNotFound(entry.code.clone()));
        }
        if entry.expires_at <= now {
            return Err(ServiceError::CouponExpired(entry.code.clone()));
        }
        if entry.used_count >= entry.usage_limit {
            return Err(ServiceError::CouponUsageExceeded(entry.code.clone()));
        }
        if subtotal < entry.minimum_order_amount {
            return Err(ServiceError::MinimumOrderNotMet(format!(
                "Coupon {} requires a minimum order of {}",
                entry.code, entry.minimum_order_amount
            )));
        }
        Ok(())
    }

    /// Computes the discount amount for a subtotal. Fixed discounts are
    /// clamped to the subtotal so the total never goes negative.
    pub fn calculate_discount(
        discount_type: DiscountType,
        value: Decimal,
        subtotal: Decimal,
    ) -> Decimal {
        match discount_type {
            DiscountType::Percentage => {
                (subtotal * value / Decimal::from(100)).round_dp(4)
            }
            DiscountType::Fixed => value.min(subtotal),
        }
    }

    /// Validates a coupon code against a subtotal and returns the ledger
    /// entry when it is redeemable.
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<coupon::Model, ServiceError> {
        let code = normalize_code(code);
        let entry = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::CouponNotFound(code))?;

        Self::check_redeemable(&entry, subtotal, Utc::now())?;
        Ok(entry)
    }

    /// Applies a coupon to a cart, replacing any previously applied code.
    #[instrument(skip(self))]
    pub async fn apply_to_cart(
        &self,
        cart_id: Uuid,
        code: &str,
    ) -> Result<CartDetails, ServiceError> {
        let code = normalize_code(code);
        let txn = self.db.begin().await?;

        let cart = carts::find_cart(&txn, cart_id).await?;

        let entry = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::CouponNotFound(code.clone()))?;
        Self::check_redeemable(&entry, cart.subtotal, Utc::now())?;

        let discount_amount =
            Self::calculate_discount(entry.discount_type, entry.value, cart.subtotal);

        cart_coupon::Entity::delete_many()
            .filter(cart_coupon::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        cart_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            code: Set(entry.code.clone()),
            discount_type: Set(entry.discount_type),
            discount_value: Set(entry.value),
            discount_amount: Set(discount_amount),
            applied_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let subtotal = cart.subtotal;
        let mut active: cart::ActiveModel = cart.into();
        active.discount_total = Set(discount_amount);
        active.total = Set(subtotal - discount_amount);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;

        info!("Applied coupon {} to cart {}", code, cart_id);
        self.event_sender
            .send_or_log(Event::CouponApplied { cart_id, code })
            .await;

        carts::load_cart_details(self.db.as_ref(), cart_id).await
    }

    /// Removes the applied coupon from a cart, if any.
    pub async fn remove_from_cart(&self, cart_id: Uuid) -> Result<CartDetails, ServiceError> {
        let txn = self.db.begin().await?;

        carts::find_cart(&txn, cart_id).await?;

        let deleted = cart_coupon::Entity::delete_many()
            .filter(cart_coupon::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        carts::refresh_cart_totals(&txn, cart_id).await?;
        txn.commit().await?;

        if deleted.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::CouponRemoved { cart_id })
                .await;
        }

        carts::load_cart_details(self.db.as_ref(), cart_id).await
    }

    /// Consumes one use of a coupon. The increment is a single conditional
    /// update so two concurrent finalizers cannot both take the last use.
    pub async fn redeem<C: ConnectionTrait>(conn: &C, code: &str) -> Result<(), ServiceError> {
        let code = normalize_code(code);
        let result = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .filter(coupon::Column::Code.eq(code.clone()))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(
                Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::UsageLimit)),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::CouponUsageExceeded(code));
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;

        if input.expires_at <= Utc::now() {
            return Err(ServiceError::ValidationError(
                "Coupon expiry must be in the future".to_string(),
            ));
        }
        match input.discount_type {
            DiscountType::Percentage => {
                if input.value < Decimal::ONE || input.value > Decimal::from(100) {
                    return Err(ServiceError::ValidationError(
                        "Percentage discount must be between 1 and 100".to_string(),
                    ));
                }
            }
            DiscountType::Fixed => {
                if input.value <= Decimal::ZERO {
                    return Err(ServiceError::ValidationError(
                        "Fixed discount must be greater than zero".to_string(),
                    ));
                }
            }
        }
        if input.minimum_order_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Minimum order amount cannot be negative".to_string(),
            ));
        }

        let code = normalize_code(&input.code);
        let existing = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(self.db.as_ref())
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let saved = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            discount_type: Set(input.discount_type),
            value: Set(input.value),
            minimum_order_amount: Set(input.minimum_order_amount),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            is_active: Set(true),
            expires_at: Set(input.expires_at),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        info!("Created coupon {} ({})", saved.id, saved.code);
        self.event_sender
            .send_or_log(Event::CouponCreated(saved.id))
            .await;

        Ok(saved)
    }

    pub async fn update_coupon(
        &self,
        id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        let entry = self.get_coupon(id).await?;

        if let Some(usage_limit) = input.usage_limit {
            if usage_limit < entry.used_count {
                return Err(ServiceError::ValidationError(format!(
                    "Usage limit cannot be lower than the {} uses already recorded",
                    entry.used_count
                )));
            }
        }

        let mut active: coupon::ActiveModel = entry.into();
        if let Some(minimum) = input.minimum_order_amount {
            if minimum < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Minimum order amount cannot be negative".to_string(),
                ));
            }
            active.minimum_order_amount = Set(minimum);
        }
        if let Some(usage_limit) = input.usage_limit {
            active.usage_limit = Set(usage_limit);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(expires_at) = input.expires_at {
            active.expires_at = Set(expires_at);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn get_coupon(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        coupon::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon with ID {} not found", id)))
    }

    pub async fn delete_coupon(&self, id: Uuid) -> Result<(), ServiceError> {
        let entry = self.get_coupon(id).await?;
        entry.delete(self.db.as_ref()).await?;
        Ok(())
    }

    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let paginator = coupon::Entity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page.max(1));

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((items, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn sample_coupon() -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            discount_type: DiscountType::Percentage,
            value: dec!(10),
            minimum_order_amount: dec!(50),
            usage_limit: 5,
            used_count: 0,
            is_active: true,
            expires_at: Utc::now() + chrono::Duration::days(30),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount_math() {
        let amount =
            CouponService::calculate_discount(DiscountType::Percentage, dec!(10), dec!(200));
        assert_eq!(amount, dec!(20));

        let amount =
            CouponService::calculate_discount(DiscountType::Percentage, dec!(33), dec!(99.99));
        assert_eq!(amount, dec!(32.9967));
    }

    #[test]
    fn fixed_discount_is_clamped_to_subtotal() {
        let amount = CouponService::calculate_discount(DiscountType::Fixed, dec!(15), dec!(100));
        assert_eq!(amount, dec!(15));

        // A fixed discount larger than the subtotal leaves a zero total
        let amount = CouponService::calculate_discount(DiscountType::Fixed, dec!(150), dec!(100));
        assert_eq!(amount, dec!(100));
    }

    #[test]
    fn redeemable_coupon_passes_all_checks() {
        let entry = sample_coupon();
        assert!(CouponService::check_redeemable(&entry, dec!(75), Utc::now()).is_ok());
    }

    #[test]
    fn inactive_coupon_reads_as_not_found() {
        let mut entry = sample_coupon();
        entry.is_active = false;
        let err = CouponService::check_redeemable(&entry, dec!(75), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::CouponNotFound(_));
    }

    #[test]
    fn expired_coupon_is_rejected() {
        let mut entry = sample_coupon();
        entry.expires_at = Utc::now() - chrono::Duration::hours(1);
        let err = CouponService::check_redeemable(&entry, dec!(75), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::CouponExpired(_));
    }

    #[test]
    fn exhausted_coupon_is_rejected() {
        let mut entry = sample_coupon();
        entry.used_count = entry.usage_limit;
        let err = CouponService::check_redeemable(&entry, dec!(75), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::CouponUsageExceeded(_));
    }

    #[test]
    fn subtotal_below_minimum_is_rejected() {
        let entry = sample_coupon();
        let err = CouponService::check_redeemable(&entry, dec!(49.99), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::MinimumOrderNotMet(_));

        // Exactly the minimum qualifies
        assert!(CouponService::check_redeemable(&entry, dec!(50), Utc::now()).is_ok());
    }
}
