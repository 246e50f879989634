// app/src/store/memory.rs

//! In-memory backend. One `parking_lot` mutex guards every table, so each
//! trait call is atomic the same way a single SQL statement is. The guard is
//! never held across an `.await`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::{
  CartStore, CatalogStore, ClaimOutcome, LedgerStore, OrderStore, PromoStore, SubscriptionStore, WalletStore,
};
use crate::errors::{AppError, Result};
use crate::models::{
  CartLine, DeliveryStatus, LedgerEntry, LineItem, NewLedgerEntry, NewOrder, Order, OrderLine, PaidUpdate,
  PaymentMethod, PaymentStatus, PaymentSync, Product, PromoCode, RefundResolution, RefundStatus, Subscription,
  WalletEntry,
};

#[derive(Default)]
struct Tables {
  products: HashMap<Uuid, Product>,
  carts: HashMap<Uuid, Vec<CartLine>>,
  orders: HashMap<Uuid, Order>,
  order_keys: HashMap<(PaymentMethod, String), Uuid>,
  order_lines: HashMap<Uuid, Vec<OrderLine>>,
  ledger: Vec<LedgerEntry>,
  subscriptions: HashMap<Uuid, Subscription>,
  promos: HashMap<String, PromoCode>,
  wallet_entries: Vec<WalletEntry>,
  wallet_balances: HashMap<Uuid, i64>,
}

#[derive(Default)]
pub struct MemoryStore {
  tables: Mutex<Tables>,
  fail_ledger_appends: AtomicBool,
  fail_cart_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes every ledger append fail, to exercise best-effort ledger writes.
  pub fn fail_ledger_appends(&self, fail: bool) {
    self.fail_ledger_appends.store(fail, Ordering::SeqCst);
  }

  /// Makes cart inserts and updates fail, to exercise stock compensation.
  pub fn fail_cart_writes(&self, fail: bool) {
    self.fail_cart_writes.store(fail, Ordering::SeqCst);
  }

  pub fn order_count(&self) -> usize {
    self.tables.lock().orders.len()
  }

  fn check_cart_writes(&self) -> Result<()> {
    if self.fail_cart_writes.load(Ordering::SeqCst) {
      return Err(AppError::Internal("cart table unavailable".to_string()));
    }
    Ok(())
  }
}

fn sorted_newest_first(mut orders: Vec<Order>) -> Vec<Order> {
  orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
  orders
}

#[async_trait]
impl CatalogStore for MemoryStore {
  async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
    Ok(self.tables.lock().products.get(&id).cloned())
  }

  async fn insert_product(&self, product: Product) -> Result<()> {
    self.tables.lock().products.insert(product.id, product);
    Ok(())
  }

  async fn adjust_stock(&self, id: Uuid, delta: i32) -> Result<Option<i32>> {
    let mut tables = self.tables.lock();
    let Some(product) = tables.products.get_mut(&id) else {
      return Ok(None);
    };
    let next = product.stock_quantity + delta;
    if next < 0 {
      return Ok(None);
    }
    product.stock_quantity = next;
    product.updated_at = Utc::now();
    Ok(Some(next))
  }
}

#[async_trait]
impl CartStore for MemoryStore {
  async fn lines(&self, account_id: Uuid) -> Result<Vec<CartLine>> {
    Ok(self.tables.lock().carts.get(&account_id).cloned().unwrap_or_default())
  }

  async fn line(&self, account_id: Uuid, product_id: Uuid) -> Result<Option<CartLine>> {
    let tables = self.tables.lock();
    Ok(
      tables
        .carts
        .get(&account_id)
        .and_then(|lines| lines.iter().find(|l| l.product_id == product_id).cloned()),
    )
  }

  async fn add_line(&self, line: CartLine) -> Result<CartLine> {
    self.check_cart_writes()?;
    let mut tables = self.tables.lock();
    let lines = tables.carts.entry(line.account_id).or_default();
    if let Some(existing) = lines.iter_mut().find(|l| l.product_id == line.product_id) {
      existing.quantity += line.quantity;
      return Ok(existing.clone());
    }
    lines.push(line.clone());
    Ok(line)
  }

  async fn set_quantity(&self, account_id: Uuid, product_id: Uuid, quantity: i32) -> Result<Option<CartLine>> {
    self.check_cart_writes()?;
    let mut tables = self.tables.lock();
    let updated = tables
      .carts
      .get_mut(&account_id)
      .and_then(|lines| lines.iter_mut().find(|l| l.product_id == product_id))
      .map(|line| {
        line.quantity = quantity;
        line.clone()
      });
    Ok(updated)
  }

  async fn remove_line(&self, account_id: Uuid, product_id: Uuid) -> Result<Option<CartLine>> {
    let mut tables = self.tables.lock();
    let Some(lines) = tables.carts.get_mut(&account_id) else {
      return Ok(None);
    };
    let removed = lines
      .iter()
      .position(|l| l.product_id == product_id)
      .map(|idx| lines.remove(idx));
    Ok(removed)
  }

  async fn clear(&self, account_id: Uuid) -> Result<u64> {
    let removed = self.tables.lock().carts.remove(&account_id).unwrap_or_default();
    Ok(removed.len() as u64)
  }
}

#[async_trait]
impl OrderStore for MemoryStore {
  async fn insert_or_fetch(&self, order: NewOrder, lines: Vec<LineItem>) -> Result<ClaimOutcome> {
    let mut tables = self.tables.lock();
    let key = (order.payment_method, order.payment_reference.clone());
    if let Some(existing_id) = tables.order_keys.get(&key) {
      let existing = tables
        .orders
        .get(existing_id)
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("Dangling idempotency key for order {}", existing_id)))?;
      return Ok(ClaimOutcome::Existing(existing));
    }

    let order = order.into_order();
    let order_lines = lines
      .into_iter()
      .map(|item| OrderLine {
        id: Uuid::new_v4(),
        order_id: order.id,
        product_id: item.product_id,
        product_name: item.product_name,
        unit_price_cents: item.unit_price_cents,
        quantity: item.quantity,
      })
      .collect();
    tables.order_keys.insert(key, order.id);
    tables.order_lines.insert(order.id, order_lines);
    tables.orders.insert(order.id, order.clone());
    Ok(ClaimOutcome::Created(order))
  }

  async fn get(&self, id: Uuid) -> Result<Option<Order>> {
    Ok(self.tables.lock().orders.get(&id).cloned())
  }

  async fn find_by_reference(&self, method: PaymentMethod, reference: &str) -> Result<Option<Order>> {
    let tables = self.tables.lock();
    Ok(
      tables
        .order_keys
        .get(&(method, reference.to_string()))
        .and_then(|id| tables.orders.get(id).cloned()),
    )
  }

  async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>> {
    Ok(self.tables.lock().order_lines.get(&order_id).cloned().unwrap_or_default())
  }

  async fn mark_paid(&self, id: Uuid, update: PaidUpdate) -> Result<Option<Order>> {
    let mut tables = self.tables.lock();
    let Some(order) = tables.orders.get_mut(&id) else {
      return Ok(None);
    };
    if order.payment_status.is_settled() {
      return Ok(None);
    }
    order.payment_status = PaymentStatus::Paid;
    order.paid_at = Some(update.paid_at);
    if update.payer_email.is_some() {
      order.payer_email = update.payer_email;
    }
    if let Some(delivery_type) = update.delivery_type {
      order.delivery_type = delivery_type;
    }
    if update.scheduled_at.is_some() {
      order.scheduled_at = update.scheduled_at;
    }
    if update.eta_window_start.is_some() {
      order.eta_window_start = update.eta_window_start;
    }
    if update.eta_window_end.is_some() {
      order.eta_window_end = update.eta_window_end;
    }
    if update.promo_code.is_some() {
      order.promo_code = update.promo_code;
    }
    if let Some(discount) = update.promo_discount_cents {
      order.promo_discount_cents = discount;
    }
    order.updated_at = Utc::now();
    Ok(Some(order.clone()))
  }

  async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<Order>> {
    let tables = self.tables.lock();
    let orders = tables.orders.values().filter(|o| o.account_id == account_id).cloned().collect();
    Ok(sorted_newest_first(orders))
  }

  async fn list_all(&self) -> Result<Vec<Order>> {
    let orders = self.tables.lock().orders.values().cloned().collect();
    Ok(sorted_newest_first(orders))
  }

  async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let mut tables = self.tables.lock();
    let now = Utc::now();
    let mut expired = 0;
    for order in tables.orders.values_mut() {
      if order.payment_status.is_awaiting_payment() && order.created_at < cutoff {
        order.payment_status = PaymentStatus::Cancelled;
        order.updated_at = now;
        expired += 1;
      }
    }
    Ok(expired)
  }

  async fn sync_payment(&self, id: Uuid, sync: PaymentSync) -> Result<bool> {
    let mut tables = self.tables.lock();
    let Some(order) = tables.orders.get_mut(&id) else {
      return Ok(false);
    };
    if order.payment_status.is_settled() {
      return Ok(false);
    }
    order.payment_status = PaymentStatus::Paid;
    order.payment_method = order.payment_method.or(sync.payment_method);
    if order.payment_reference.is_none() {
      order.payment_reference = sync.payment_reference;
    }
    if order.payer_email.is_none() {
      order.payer_email = sync.payer_email;
    }
    order.paid_at = order.paid_at.or(Some(sync.paid_at));
    order.updated_at = Utc::now();
    Ok(true)
  }

  async fn open_refund_request(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<bool> {
    let mut tables = self.tables.lock();
    let Some(order) = tables.orders.get_mut(&id) else {
      return Ok(false);
    };
    if order.refund_status == RefundStatus::Requested || !order.payment_status.accepts_refund_request() {
      return Ok(false);
    }
    order.refund_status = RefundStatus::Requested;
    order.refund_reason = Some(reason.to_string());
    order.refund_requested_at = Some(at);
    order.updated_at = at;
    Ok(true)
  }

  async fn resolve_refund(&self, id: Uuid, resolution: RefundResolution) -> Result<Option<Order>> {
    let mut tables = self.tables.lock();
    let Some(order) = tables.orders.get_mut(&id) else {
      return Ok(None);
    };
    if order.refund_status != RefundStatus::Requested {
      return Ok(None);
    }
    match resolution {
      RefundResolution::Approved {
        refunded_total_cents,
        payment_status,
        reviewed_at,
      } => {
        order.refund_status = RefundStatus::Approved;
        order.refunded_amount_cents = refunded_total_cents;
        order.payment_status = payment_status;
        order.refund_reviewed_at = Some(reviewed_at);
        order.updated_at = reviewed_at;
      }
      RefundResolution::Rejected { reviewed_at } => {
        order.refund_status = RefundStatus::Rejected;
        order.refund_reviewed_at = Some(reviewed_at);
        order.updated_at = reviewed_at;
      }
    }
    Ok(Some(order.clone()))
  }

  async fn set_delivery_status(&self, id: Uuid, from: DeliveryStatus, to: DeliveryStatus) -> Result<Option<Order>> {
    let mut tables = self.tables.lock();
    let Some(order) = tables.orders.get_mut(&id) else {
      return Ok(None);
    };
    if order.delivery_status != from || !order.payment_status.is_fulfillable() {
      return Ok(None);
    }
    order.delivery_status = to;
    order.updated_at = Utc::now();
    Ok(Some(order.clone()))
  }
}

#[async_trait]
impl LedgerStore for MemoryStore {
  async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
    if self.fail_ledger_appends.load(Ordering::SeqCst) {
      return Err(AppError::Internal("ledger table unavailable".to_string()));
    }
    let entry = entry.into_entry(Utc::now());
    self.tables.lock().ledger.push(entry.clone());
    Ok(entry)
  }

  async fn for_order(&self, order_id: Uuid) -> Result<Vec<LedgerEntry>> {
    let tables = self.tables.lock();
    Ok(tables.ledger.iter().filter(|e| e.order_id == order_id).cloned().collect())
  }

  async fn settled_payments(&self) -> Result<Vec<LedgerEntry>> {
    let tables = self.tables.lock();
    Ok(tables.ledger.iter().filter(|e| e.status.is_settled_payment()).cloned().collect())
  }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
  async fn current(&self, account_id: Uuid) -> Result<Option<Subscription>> {
    Ok(self.tables.lock().subscriptions.get(&account_id).cloned())
  }

  async fn save(&self, subscription: Subscription) -> Result<()> {
    self.tables.lock().subscriptions.insert(subscription.account_id, subscription);
    Ok(())
  }
}

#[async_trait]
impl PromoStore for MemoryStore {
  async fn find_active(&self, code: &str, now: DateTime<Utc>) -> Result<Option<PromoCode>> {
    let tables = self.tables.lock();
    Ok(tables.promos.get(code).filter(|p| p.is_usable_at(now)).cloned())
  }

  async fn upsert(&self, promo: PromoCode) -> Result<()> {
    self.tables.lock().promos.insert(promo.code.clone(), promo);
    Ok(())
  }
}

#[async_trait]
impl WalletStore for MemoryStore {
  async fn post(&self, account_id: Uuid, amount_cents: i64, reference: &str) -> Result<i64> {
    let mut tables = self.tables.lock();
    tables.wallet_entries.push(WalletEntry {
      id: Uuid::new_v4(),
      account_id,
      amount_cents,
      reference: reference.to_string(),
      created_at: Utc::now(),
    });
    let balance = tables.wallet_balances.entry(account_id).or_insert(0);
    *balance += amount_cents;
    Ok(*balance)
  }

  async fn balance(&self, account_id: Uuid) -> Result<i64> {
    Ok(self.tables.lock().wallet_balances.get(&account_id).copied().unwrap_or(0))
  }

  async fn history(&self, account_id: Uuid) -> Result<Vec<WalletEntry>> {
    let tables = self.tables.lock();
    Ok(tables.wallet_entries.iter().filter(|e| e.account_id == account_id).cloned().collect())
  }
}
