// app/src/services/orders.rs

//! Read side of orders. Listings sweep expired pending orders first so a
//! stale PENDING row is never shown as still awaiting payment.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{AccountIdentity, LedgerEntry, Order, OrderLine};
use crate::store::Stores;

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
  pub order: Order,
  pub lines: Vec<OrderLine>,
  pub ledger: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountStats {
  pub order_count: usize,
  pub total_spent_cents: i64,
}

/// Cancels PENDING/PROCESSING orders older than `timeout`.
pub async fn expire_stale(stores: &Stores, timeout: Duration, now: DateTime<Utc>) -> Result<u64> {
  let expired = stores.orders.expire_stale(now - timeout).await?;
  if expired > 0 {
    info!(expired, "Stale pending orders cancelled.");
  }
  Ok(expired)
}

#[instrument(name = "orders::list_for_account", skip(stores, timeout))]
pub async fn list_for_account(stores: &Stores, account_id: Uuid, timeout: Duration, now: DateTime<Utc>) -> Result<Vec<Order>> {
  expire_stale(stores, timeout, now).await?;
  stores.orders.list_for_account(account_id).await
}

#[instrument(name = "orders::list_all", skip(stores, timeout))]
pub async fn list_all(stores: &Stores, timeout: Duration, now: DateTime<Utc>) -> Result<Vec<Order>> {
  expire_stale(stores, timeout, now).await?;
  stores.orders.list_all().await
}

/// The order with its lines and ledger history, if `viewer` owns it or is an admin.
#[instrument(name = "orders::get_for_viewer", skip(stores, viewer), fields(viewer = %viewer.account_id))]
pub async fn get_for_viewer(stores: &Stores, order_id: Uuid, viewer: &AccountIdentity) -> Result<OrderDetail> {
  let order = stores
    .orders
    .get(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found.", order_id)))?;
  if order.account_id != viewer.account_id && !viewer.is_admin() {
    return Err(AppError::Forbidden("You do not have access to this order.".to_string()));
  }
  let lines = stores.orders.order_lines(order_id).await?;
  let ledger = stores.ledger.for_order(order_id).await?;
  Ok(OrderDetail { order, lines, ledger })
}

pub async fn account_stats(stores: &Stores, account_id: Uuid) -> Result<AccountStats> {
  let orders = stores.orders.list_for_account(account_id).await?;
  let total_spent_cents = orders
    .iter()
    .filter(|o| o.payment_status.is_settled())
    .map(|o| o.total_amount_cents - o.refunded_amount_cents)
    .sum();
  Ok(AccountStats {
    order_count: orders.len(),
    total_spent_cents,
  })
}
