// app/src/services/benefits.rs

//! Delivery-fee waivers and plan discounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{items_total_cents, LineItem, Plan};
use crate::services::subscriptions;
use crate::store::Stores;

pub const DEFAULT_DELIVERY_FEE_CENTS: i64 = 200;
/// Some gateways refuse zero-amount intents.
pub const MINIMUM_CHARGE_CENTS: i64 = 50;

const STANDARD_WAIVER_THRESHOLD_CENTS: i64 = 1000;
const PREMIUM_WAIVER_THRESHOLD_CENTS: i64 = 500;
const PREMIUM_DISCOUNT_CENTS: i64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BenefitQuote {
  pub base_cents: i64,
  pub delivery_fee_cents: i64,
  pub discount_cents: i64,
  /// Plan the benefits were computed for; `None` without an active subscription.
  pub plan: Option<Plan>,
  pub total_cents: i64,
}

/// Pure rule table. `plan` must already reflect whether the subscription is active.
pub fn quote(base_cents: i64, plan: Option<Plan>) -> BenefitQuote {
  let (threshold, discount_cents) = match plan {
    Some(Plan::Premium) => (PREMIUM_WAIVER_THRESHOLD_CENTS, PREMIUM_DISCOUNT_CENTS),
    Some(Plan::Basic) | None => (STANDARD_WAIVER_THRESHOLD_CENTS, 0),
  };
  let delivery_fee_cents = if base_cents >= threshold { 0 } else { DEFAULT_DELIVERY_FEE_CENTS };
  BenefitQuote {
    base_cents,
    delivery_fee_cents,
    discount_cents,
    plan,
    total_cents: charge_floor(base_cents + delivery_fee_cents - discount_cents),
  }
}

pub fn charge_floor(amount_cents: i64) -> i64 {
  amount_cents.max(MINIMUM_CHARGE_CENTS)
}

/// Looks up the account's active plan (reconciling the subscription once) and
/// quotes the cart `lines`.
#[instrument(name = "benefits::compute", skip(stores, lines), fields(lines = lines.len()))]
pub async fn compute(stores: &Stores, account_id: Uuid, lines: &[LineItem], now: DateTime<Utc>) -> Result<BenefitQuote> {
  let plan = subscriptions::active_plan(stores, account_id, now).await?;
  Ok(quote(items_total_cents(lines), plan))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn premium_waives_fee_from_five_dollars() {
    let q = quote(1200, Some(Plan::Premium));
    assert_eq!(q.delivery_fee_cents, 0);
    assert_eq!(q.discount_cents, 150);
    assert_eq!(q.total_cents, 1050);

    let q = quote(400, Some(Plan::Premium));
    assert_eq!(q.delivery_fee_cents, 200);
    assert_eq!(q.total_cents, 450);
  }

  #[test]
  fn basic_and_no_plan_share_the_ten_dollar_threshold() {
    for plan in [None, Some(Plan::Basic)] {
      assert_eq!(quote(999, plan).delivery_fee_cents, 200);
      assert_eq!(quote(1000, plan).delivery_fee_cents, 0);
      assert_eq!(quote(1000, plan).discount_cents, 0);
    }
  }

  #[test]
  fn total_never_drops_below_the_floor() {
    let q = quote(0, Some(Plan::Premium));
    assert_eq!(q.total_cents, MINIMUM_CHARGE_CENTS);
  }
}
