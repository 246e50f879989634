// app/src/store/mod.rs

//! Persistence seams.
//!
//! Every conditional write the order/payment core relies on is expressed as a
//! single store call, so the Postgres and in-memory backends give the same
//! guarantees: the `(payment_method, payment_reference)` claim is atomic,
//! `mark_paid` never touches a settled order, refund resolution re-checks the
//! outstanding request, and the reconciler only fills empty columns.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
  CartLine, DeliveryStatus, LedgerEntry, LineItem, NewLedgerEntry, NewOrder, Order, OrderLine, PaidUpdate,
  PaymentMethod, PaymentSync, Product, PromoCode, RefundResolution, Subscription, WalletEntry,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of the atomic insert-or-fetch on the idempotency key.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
  Created(Order),
  /// Another caller already holds this `(method, reference)`.
  Existing(Order),
}

impl ClaimOutcome {
  pub fn order(&self) -> &Order {
    match self {
      ClaimOutcome::Created(o) | ClaimOutcome::Existing(o) => o,
    }
  }

  pub fn into_order(self) -> Order {
    match self {
      ClaimOutcome::Created(o) | ClaimOutcome::Existing(o) => o,
    }
  }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
  async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;

  async fn insert_product(&self, product: Product) -> Result<()>;

  /// Adds `delta` to the stock level unless that would take it below zero.
  /// Returns the new level, or `None` when the product is missing or the change was refused.
  async fn adjust_stock(&self, id: Uuid, delta: i32) -> Result<Option<i32>>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
  async fn lines(&self, account_id: Uuid) -> Result<Vec<CartLine>>;

  async fn line(&self, account_id: Uuid, product_id: Uuid) -> Result<Option<CartLine>>;

  /// Inserts the line or adds its quantity to the existing one.
  async fn add_line(&self, line: CartLine) -> Result<CartLine>;

  async fn set_quantity(&self, account_id: Uuid, product_id: Uuid, quantity: i32) -> Result<Option<CartLine>>;

  async fn remove_line(&self, account_id: Uuid, product_id: Uuid) -> Result<Option<CartLine>>;

  /// Deletes every line. Stock stays reserved: the reservation became the sale.
  async fn clear(&self, account_id: Uuid) -> Result<u64>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
  /// Inserts the order and its lines in one unit, unless an order with the same
  /// `(payment_method, payment_reference)` exists, in which case that order is
  /// returned and nothing is written.
  async fn insert_or_fetch(&self, order: NewOrder, lines: Vec<LineItem>) -> Result<ClaimOutcome>;

  async fn get(&self, id: Uuid) -> Result<Option<Order>>;

  async fn find_by_reference(&self, method: PaymentMethod, reference: &str) -> Result<Option<Order>>;

  async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>>;

  /// Moves an unsettled order to PAID. Returns `None` when it was already settled.
  async fn mark_paid(&self, id: Uuid, update: PaidUpdate) -> Result<Option<Order>>;

  async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<Order>>;

  async fn list_all(&self) -> Result<Vec<Order>>;

  /// Cancels PENDING/PROCESSING orders created before `cutoff`.
  async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;

  /// Promotes an unsettled order to PAID, filling only the payment columns that are empty.
  async fn sync_payment(&self, id: Uuid, sync: PaymentSync) -> Result<bool>;

  /// Records a refund request unless one is already outstanding or the order is not refundable.
  async fn open_refund_request(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<bool>;

  /// Resolves the outstanding request. `None` when no request was outstanding at write time.
  async fn resolve_refund(&self, id: Uuid, resolution: RefundResolution) -> Result<Option<Order>>;

  async fn set_delivery_status(&self, id: Uuid, from: DeliveryStatus, to: DeliveryStatus) -> Result<Option<Order>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
  async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry>;

  /// Oldest first.
  async fn for_order(&self, order_id: Uuid) -> Result<Vec<LedgerEntry>>;

  /// Every COMPLETED or PAID entry, oldest first.
  async fn settled_payments(&self) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
  /// The most recently started subscription for the account.
  async fn current(&self, account_id: Uuid) -> Result<Option<Subscription>>;

  async fn save(&self, subscription: Subscription) -> Result<()>;
}

#[async_trait]
pub trait PromoStore: Send + Sync {
  async fn find_active(&self, code: &str, now: DateTime<Utc>) -> Result<Option<PromoCode>>;

  async fn upsert(&self, promo: PromoCode) -> Result<()>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
  /// Appends a signed movement and updates the balance in one unit. Returns the new balance.
  async fn post(&self, account_id: Uuid, amount_cents: i64, reference: &str) -> Result<i64>;

  async fn balance(&self, account_id: Uuid) -> Result<i64>;

  async fn history(&self, account_id: Uuid) -> Result<Vec<WalletEntry>>;
}

/// The full set of stores the application runs against.
#[derive(Clone)]
pub struct Stores {
  pub catalog: Arc<dyn CatalogStore>,
  pub carts: Arc<dyn CartStore>,
  pub orders: Arc<dyn OrderStore>,
  pub ledger: Arc<dyn LedgerStore>,
  pub subscriptions: Arc<dyn SubscriptionStore>,
  pub promos: Arc<dyn PromoStore>,
  pub wallets: Arc<dyn WalletStore>,
}

impl Stores {
  pub fn from_backend<S>(backend: Arc<S>) -> Self
  where
    S: CatalogStore + CartStore + OrderStore + LedgerStore + SubscriptionStore + PromoStore + WalletStore + 'static,
  {
    Self {
      catalog: backend.clone(),
      carts: backend.clone(),
      orders: backend.clone(),
      ledger: backend.clone(),
      subscriptions: backend.clone(),
      promos: backend.clone(),
      wallets: backend,
    }
  }

  pub fn in_memory() -> Self {
    Self::from_backend(Arc::new(MemoryStore::new()))
  }
}

/// Demo catalog used when running against the in-memory store or with `SEED_DB`.
pub async fn seed_demo_data(stores: &Stores) -> Result<Vec<Product>> {
  let products = vec![
    Product::new("Kopi O", 180, 200),
    Product::new("Kaya Toast Set", 550, 100),
    Product::new("Nasi Lemak", 650, 80),
    Product::new("Laksa", 780, 60),
  ];
  for product in &products {
    stores.catalog.insert_product(product.clone()).await?;
  }
  stores
    .promos
    .upsert(PromoCode {
      code: "WELCOME15".to_string(),
      percent_off: 15.0,
      expires_at: None,
      active: true,
    })
    .await?;
  tracing::info!(products = products.len(), "Seeded demo catalog.");
  Ok(products)
}
