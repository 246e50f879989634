// app/src/services/reconciler.rs

//! Aligns orders with the ledger and cancels pending orders nobody confirmed.
//!
//! Both sweeps are conditional writes, so running them repeatedly or next to a
//! concurrent finalize is harmless.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::Result;
use crate::models::PaymentSync;
use crate::services::orders;
use crate::store::Stores;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
  pub synced: u64,
  pub expired: u64,
}

/// Promotes unsettled orders that the ledger records as paid.
#[instrument(name = "reconciler::sync_statuses", skip(stores))]
pub async fn sync_statuses(stores: &Stores) -> Result<u64> {
  let mut synced = 0;
  for entry in stores.ledger.settled_payments().await? {
    let Some(order) = stores.orders.get(entry.order_id).await? else {
      warn!(order_id = %entry.order_id, entry_id = %entry.id, "Ledger entry references a missing order.");
      continue;
    };
    if order.payment_status.is_settled() {
      continue;
    }
    let sync = PaymentSync {
      payment_method: entry.payment_method,
      payment_reference: entry.payment_reference.clone(),
      payer_email: entry.payer_email.clone(),
      paid_at: entry.created_at,
    };
    if stores.orders.sync_payment(order.id, sync).await? {
      debug!(order_id = %order.id, from = %order.payment_status, "Order promoted from ledger.");
      synced += 1;
    }
  }
  Ok(synced)
}

pub async fn run_once(stores: &Stores, pending_timeout: chrono::Duration, now: DateTime<Utc>) -> Result<ReconcileReport> {
  let synced = sync_statuses(stores).await?;
  let expired = orders::expire_stale(stores, pending_timeout, now).await?;
  let report = ReconcileReport { synced, expired };
  if synced > 0 || expired > 0 {
    info!(synced, expired, "Reconciliation pass changed orders.");
  }
  Ok(report)
}

/// Runs [`run_once`] now and then every `every`.
pub fn spawn(stores: Stores, pending_timeout: chrono::Duration, every: StdDuration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      if let Err(e) = run_once(&stores, pending_timeout, Utc::now()).await {
        error!(error = %e, "Reconciliation pass failed.");
      }
    }
  })
}
