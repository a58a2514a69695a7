pub mod carts;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payment_webhooks;
pub mod products;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::{
    CartService, CatalogService, CheckoutService, CouponService, OrderService, PaymentService,
};

/// All domain services wired to the same pool and event channel
#[derive(Clone)]
pub struct AppServices {
    pub catalog: CatalogService,
    pub carts: CartService,
    pub coupons: CouponService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub payments: PaymentService,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let orders = OrderService::new(db.clone(), event_sender.clone());
        let payments = PaymentService::new(
            db.clone(),
            event_sender.clone(),
            orders.clone(),
            &config.payment_transfer_prefix,
        )?;

        Ok(Self {
            catalog: CatalogService::new(db.clone(), event_sender.clone()),
            carts: CartService::new(
                db.clone(),
                event_sender.clone(),
                config.default_currency.clone(),
            ),
            coupons: CouponService::new(db.clone(), event_sender.clone()),
            checkout: CheckoutService::new(
                db,
                event_sender,
                config.payment_qr_base_url.clone(),
                config.payment_transfer_prefix.clone(),
            ),
            orders,
            payments,
        })
    }
}
