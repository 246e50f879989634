// app/src/intents.rs

//! Pending payment registry.
//!
//! One in-flight intent per `(account, payment method)`. Opening a new intent
//! replaces the old one outright; resolving requires the exact provider
//! reference, so a stale or foreign reference never picks up someone else's
//! cart snapshot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::models::{LineItem, PaymentMethod};
use crate::services::delivery::DeliveryPlan;

/// Everything needed to rebuild the order if the live cart is gone by confirmation time.
#[derive(Debug, Clone, Serialize)]
pub struct PendingIntent {
  pub provider_ref: String,
  pub lines: Vec<LineItem>,
  pub subtotal_cents: i64,
  pub delivery_fee_cents: i64,
  pub benefit_discount_cents: i64,
  pub promo_code: Option<String>,
  pub promo_discount_cents: i64,
  pub total_cents: i64,
  pub delivery: DeliveryPlan,
  /// Set when the order row was created eagerly at checkout.
  pub order_id: Option<Uuid>,
  pub opened_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct IntentRegistry {
  slots: Mutex<HashMap<(Uuid, PaymentMethod), PendingIntent>>,
}

impl IntentRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records `intent`, returning whatever it replaced.
  pub fn open(&self, account_id: Uuid, method: PaymentMethod, intent: PendingIntent) -> Option<PendingIntent> {
    let replaced = self.slots.lock().insert((account_id, method), intent);
    if let Some(old) = &replaced {
      debug!(%account_id, %method, superseded = %old.provider_ref, "Pending intent replaced.");
    }
    replaced
  }

  /// The snapshot for `provider_ref`, only if it is the account's current intent for `method`.
  pub fn resolve(&self, account_id: Uuid, method: PaymentMethod, provider_ref: &str) -> Option<PendingIntent> {
    self
      .slots
      .lock()
      .get(&(account_id, method))
      .filter(|intent| intent.provider_ref == provider_ref)
      .cloned()
  }

  /// Drops the slot if it still holds `provider_ref`.
  pub fn clear(&self, account_id: Uuid, method: PaymentMethod, provider_ref: &str) -> bool {
    let mut slots = self.slots.lock();
    let matches = slots
      .get(&(account_id, method))
      .is_some_and(|intent| intent.provider_ref == provider_ref);
    if matches {
      slots.remove(&(account_id, method));
    }
    matches
  }

  pub fn len(&self) -> usize {
    self.slots.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.lock().is_empty()
  }
}
