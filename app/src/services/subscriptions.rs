// app/src/services/subscriptions.rs

//! Subscription lifecycle.
//!
//! Reads never mutate on their own: callers invoke [`reconcile`] once at the
//! request boundary, which renews or expires a lapsed ACTIVE row and persists
//! the change, then ask [`is_active`] of the reconciled row.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{subscription::add_billing_period, Plan, Subscription, SubscriptionStatus};
use crate::store::Stores;

/// Renews `row` by one billing period, or expires it, if its ACTIVE period has
/// lapsed. Returns the row as persisted.
pub async fn reconcile(stores: &Stores, mut row: Subscription, now: DateTime<Utc>) -> Result<Subscription> {
  if row.status != SubscriptionStatus::Active || row.end_date >= now {
    return Ok(row);
  }
  if row.auto_renew && !row.cancel_at_period_end {
    row.end_date = add_billing_period(row.end_date);
    info!(subscription_id = %row.id, end_date = %row.end_date, "Subscription renewed.");
  } else {
    row.status = SubscriptionStatus::Expired;
    info!(subscription_id = %row.id, "Subscription expired.");
  }
  row.updated_at = now;
  stores.subscriptions.save(row.clone()).await?;
  Ok(row)
}

pub fn is_active(row: Option<&Subscription>, now: DateTime<Utc>) -> bool {
  row.is_some_and(|s| s.is_active_at(now))
}

/// The account's current subscription, reconciled.
pub async fn current(stores: &Stores, account_id: Uuid, now: DateTime<Utc>) -> Result<Option<Subscription>> {
  match stores.subscriptions.current(account_id).await? {
    Some(row) => Ok(Some(reconcile(stores, row, now).await?)),
    None => Ok(None),
  }
}

pub async fn active_plan(stores: &Stores, account_id: Uuid, now: DateTime<Utc>) -> Result<Option<Plan>> {
  let row = current(stores, account_id, now).await?;
  Ok(row.filter(|s| s.is_active_at(now)).map(|s| s.plan))
}

#[instrument(name = "subscriptions::subscribe", skip(stores))]
pub async fn subscribe(stores: &Stores, account_id: Uuid, plan: Plan, now: DateTime<Utc>) -> Result<Subscription> {
  let existing = current(stores, account_id, now).await?;
  if is_active(existing.as_ref(), now) {
    return Err(AppError::Conflict("You already have an active subscription.".to_string()));
  }
  let row = Subscription::start(account_id, plan, now);
  stores.subscriptions.save(row.clone()).await?;
  info!(subscription_id = %row.id, plan = plan.as_str(), "Subscription started.");
  Ok(row)
}

#[instrument(name = "subscriptions::cancel_immediately", skip(stores))]
pub async fn cancel_immediately(stores: &Stores, account_id: Uuid, now: DateTime<Utc>) -> Result<Subscription> {
  let mut row = active_row(stores, account_id, now).await?;
  row.status = SubscriptionStatus::Cancelled;
  row.end_date = now;
  row.auto_renew = false;
  row.updated_at = now;
  stores.subscriptions.save(row.clone()).await?;
  Ok(row)
}

/// Stops renewal; benefits continue until the period ends.
#[instrument(name = "subscriptions::cancel_at_period_end", skip(stores))]
pub async fn cancel_at_period_end(stores: &Stores, account_id: Uuid, now: DateTime<Utc>) -> Result<Subscription> {
  let mut row = active_row(stores, account_id, now).await?;
  row.cancel_at_period_end = true;
  row.auto_renew = false;
  row.updated_at = now;
  stores.subscriptions.save(row.clone()).await?;
  Ok(row)
}

async fn active_row(stores: &Stores, account_id: Uuid, now: DateTime<Utc>) -> Result<Subscription> {
  current(stores, account_id, now)
    .await?
    .filter(|s| s.is_active_at(now))
    .ok_or_else(|| AppError::NotFound("No active subscription.".to_string()))
}
