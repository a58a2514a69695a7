pub mod cart;
pub mod cart_coupon;
pub mod cart_item;
pub mod checkout;
pub mod checkout_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod product;

pub use cart::Entity as Cart;
pub use cart_coupon::Entity as CartCoupon;
pub use cart_item::Entity as CartItem;
pub use checkout::Entity as Checkout;
pub use checkout_item::Entity as CheckoutItem;
pub use coupon::Entity as Coupon;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
