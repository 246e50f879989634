// app/src/services/refunds.rs

//! Refund requests and rejections, plus the amount rules and the in-process
//! claim used by approval.
//!
//! `NONE → REQUESTED → {APPROVED | REJECTED}`. Every transition is a
//! conditional store write, so a second click on the same request finds the
//! precondition gone instead of processing twice.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{
  AccountIdentity, LedgerEntry, LedgerStatus, NewLedgerEntry, Order, PaymentStatus, RefundResolution, RefundStatus,
};
use crate::store::Stores;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundMode {
  /// Refund through the payment gateway.
  Live,
  /// Credit the customer's wallet instead.
  Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundScope {
  Full,
  Partial,
}

/// Amount to refund: an explicit override, half the total for `Partial`, or the
/// full total, clamped to what has not been refunded yet.
pub fn refund_amount(order: &Order, scope: RefundScope, override_cents: Option<i64>) -> Result<i64> {
  let remaining = order.refundable_remaining_cents();
  if remaining <= 0 {
    return Err(AppError::Validation("Nothing refundable".to_string()));
  }
  let requested = match (override_cents, scope) {
    (Some(amount), _) if amount <= 0 => {
      return Err(AppError::Validation("Refund amount must be greater than zero.".to_string()));
    }
    (Some(amount), _) => amount,
    (None, RefundScope::Partial) => (order.total_amount_cents + 1) / 2,
    (None, RefundScope::Full) => order.total_amount_cents,
  };
  Ok(requested.min(remaining))
}

/// Status after refunding `amount_cents` more.
pub fn status_after_refund(order: &Order, amount_cents: i64) -> (i64, PaymentStatus) {
  let refunded_total = order.refunded_amount_cents + amount_cents;
  let status = if refunded_total >= order.total_amount_cents {
    PaymentStatus::Refunded
  } else {
    PaymentStatus::PartialRefund
  };
  (refunded_total, status)
}

/// The id the gateway refunds against: the latest recorded capture, else the payment reference.
pub fn refund_target(order: &Order, ledger: &[LedgerEntry]) -> Option<String> {
  ledger
    .iter()
    .rev()
    .filter(|e| e.status.is_settled_payment())
    .find_map(|e| e.capture_id.clone())
    .or_else(|| order.payment_reference.clone())
}

#[instrument(name = "refunds::request", skip(stores, requester, reason), fields(requester = %requester.account_id))]
pub async fn request(
  stores: &Stores,
  order_id: Uuid,
  requester: &AccountIdentity,
  reason: &str,
  window: Duration,
  now: DateTime<Utc>,
) -> Result<Order> {
  let reason = reason.trim();
  if reason.is_empty() {
    return Err(AppError::Validation("Refund reason is required.".to_string()));
  }
  let order = load(stores, order_id).await?;
  if order.account_id != requester.account_id {
    return Err(AppError::Forbidden("You can only request refunds for your own orders.".to_string()));
  }
  if !order.payment_status.accepts_refund_request() {
    return Err(AppError::Validation("Only paid orders can request refunds.".to_string()));
  }
  if !order.payment_method.is_some_and(|m| m.is_refundable()) {
    return Err(AppError::Validation(
      "Refunds available for card/PayPal payments only.".to_string(),
    ));
  }
  let paid_at = order.paid_at.unwrap_or(order.created_at);
  if now - paid_at > window {
    return Err(AppError::Validation(format!(
      "Refund window ({} days) has passed for this order.",
      window.num_days()
    )));
  }
  // The order row alone says whether a request is open; ledger rows are history.
  if order.refund_status == RefundStatus::Requested || !stores.orders.open_refund_request(order_id, reason, now).await? {
    return Err(AppError::Conflict(
      "A refund request is already pending for this order.".to_string(),
    ));
  }

  let entry = NewLedgerEntry::new(order_id, LedgerStatus::RefundRequested, order.total_amount_cents, &order.currency)
    .with_payment(order.payment_method, order.payment_reference.clone())
    .with_payer(Some(order.account_id.to_string()), order.payer_email.clone())
    .with_refund(None, Some(reason.to_string()));
  if let Err(e) = stores.ledger.append(entry).await {
    warn!(%order_id, error = %e, "Refund request recorded but the ledger append failed.");
  }
  info!(%order_id, "Refund requested.");
  load(stores, order_id).await
}

#[instrument(name = "refunds::reject", skip(stores, reviewer, reason), fields(reviewer = %reviewer.account_id))]
pub async fn reject(
  stores: &Stores,
  order_id: Uuid,
  reviewer: &AccountIdentity,
  reason: &str,
  now: DateTime<Utc>,
) -> Result<Order> {
  require_admin(reviewer)?;
  let reason = reason.trim();
  if reason.is_empty() {
    return Err(AppError::Validation("Rejection reason is required.".to_string()));
  }
  let order = stores
    .orders
    .resolve_refund(order_id, RefundResolution::Rejected { reviewed_at: now })
    .await?
    .ok_or_else(no_pending_request)?;

  let entry = NewLedgerEntry::new(order_id, LedgerStatus::RefundRejected, 0, &order.currency)
    .with_payment(order.payment_method, order.payment_reference.clone())
    .with_payer(Some(order.account_id.to_string()), order.payer_email.clone())
    .with_refund(None, Some(reason.to_string()));
  if let Err(e) = stores.ledger.append(entry).await {
    warn!(%order_id, error = %e, "Refund rejected but the ledger append failed.");
  }
  info!(%order_id, "Refund rejected.");
  Ok(order)
}

pub fn require_admin(actor: &AccountIdentity) -> Result<()> {
  if actor.is_admin() {
    Ok(())
  } else {
    Err(AppError::Forbidden("Admin access required.".to_string()))
  }
}

pub fn no_pending_request() -> AppError {
  AppError::Conflict("No pending refund request for this order.".to_string())
}

pub async fn load(stores: &Stores, order_id: Uuid) -> Result<Order> {
  stores
    .orders
    .get(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found.", order_id)))
}

/// Orders with an approval in flight in this process.
#[derive(Clone, Default)]
pub struct RefundClaims {
  held: Arc<Mutex<HashSet<Uuid>>>,
}

impl RefundClaims {
  pub fn new() -> Self {
    Self::default()
  }

  /// `None` when another approval for `order_id` is already running.
  pub fn try_claim(&self, order_id: Uuid) -> Option<RefundClaim> {
    if self.held.lock().insert(order_id) {
      Some(RefundClaim {
        held: self.held.clone(),
        order_id,
      })
    } else {
      None
    }
  }

  pub fn is_claimed(&self, order_id: Uuid) -> bool {
    self.held.lock().contains(&order_id)
  }
}

/// Releases the claim on drop.
pub struct RefundClaim {
  held: Arc<Mutex<HashSet<Uuid>>>,
  order_id: Uuid,
}

impl Drop for RefundClaim {
  fn drop(&mut self) {
    self.held.lock().remove(&self.order_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{DeliveryType, NewOrder, PaymentMethod};

  fn paid_order(total: i64, refunded: i64) -> Order {
    let mut order = NewOrder {
      id: Uuid::new_v4(),
      account_id: Uuid::new_v4(),
      subtotal_cents: total,
      delivery_fee_cents: 0,
      benefit_discount_cents: 0,
      promo_code: None,
      promo_discount_cents: 0,
      total_amount_cents: total,
      currency: "SGD".to_string(),
      payment_method: PaymentMethod::Stripe,
      payment_status: PaymentStatus::Paid,
      payment_reference: "cs_test".to_string(),
      payer_email: None,
      paid_at: Some(Utc::now()),
      delivery_type: DeliveryType::Now,
      scheduled_at: None,
      eta_window_start: None,
      eta_window_end: None,
      created_at: Utc::now(),
    }
    .into_order();
    order.refunded_amount_cents = refunded;
    order
  }

  #[test]
  fn partial_is_half_and_override_is_clamped() {
    let order = paid_order(1001, 0);
    assert_eq!(refund_amount(&order, RefundScope::Partial, None).unwrap(), 501);
    assert_eq!(refund_amount(&order, RefundScope::Full, None).unwrap(), 1001);
    assert_eq!(refund_amount(&order, RefundScope::Full, Some(5000)).unwrap(), 1001);

    let order = paid_order(1000, 800);
    assert_eq!(refund_amount(&order, RefundScope::Full, None).unwrap(), 200);
  }

  #[test]
  fn fully_refunded_order_has_nothing_left() {
    let order = paid_order(1000, 1000);
    let err = refund_amount(&order, RefundScope::Full, None).unwrap_err();
    assert_eq!(err.user_message(), "Nothing refundable");
  }

  #[test]
  fn status_depends_on_cumulative_refund() {
    let order = paid_order(1000, 400);
    assert_eq!(status_after_refund(&order, 300), (700, PaymentStatus::PartialRefund));
    assert_eq!(status_after_refund(&order, 600), (1000, PaymentStatus::Refunded));
  }

  #[test]
  fn claims_are_exclusive_until_dropped() {
    let claims = RefundClaims::new();
    let id = Uuid::new_v4();
    let first = claims.try_claim(id);
    assert!(first.is_some());
    assert!(claims.try_claim(id).is_none());
    drop(first);
    assert!(claims.try_claim(id).is_some());
  }
}
