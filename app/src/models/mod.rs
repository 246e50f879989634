// app/src/models/mod.rs

//! Persisted entities and the value types that travel with them.

pub mod account;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod product;
pub mod promo;
pub mod subscription;
pub mod transaction;
pub mod wallet;

pub use account::{AccountIdentity, Role};
pub use cart_item::CartLine;
pub use order::{
  DeliveryStatus, DeliveryType, NewOrder, Order, PaidUpdate, PaymentMethod, PaymentStatus, PaymentSync, RefundResolution,
  RefundStatus,
};
pub use order_item::{items_total_cents, LineItem, OrderLine};
pub use product::Product;
pub use promo::PromoCode;
pub use subscription::{Plan, Subscription, SubscriptionStatus};
pub use transaction::{LedgerEntry, LedgerStatus, NewLedgerEntry};
pub use wallet::WalletEntry;
