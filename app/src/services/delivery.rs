// app/src/services/delivery.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{DeliveryType, Order};
use crate::store::Stores;

const MIN_LEAD_MINUTES: i64 = 45;
const EXPRESS_THRESHOLD_CENTS: i64 = 3000;

/// Delivery choice captured at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPlan {
  pub delivery_type: DeliveryType,
  pub scheduled_at: Option<DateTime<Utc>>,
}

impl DeliveryPlan {
  pub fn now() -> Self {
    Self {
      delivery_type: DeliveryType::Now,
      scheduled_at: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EtaWindow {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

/// Parses an RFC 3339 timestamp and requires it to be at least 45 minutes ahead of `now`.
pub fn validate_schedule(requested: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
  let raw = requested
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| AppError::InvalidSchedule("Scheduled time required.".to_string()))?;
  let scheduled = DateTime::parse_from_rfc3339(raw)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| AppError::InvalidSchedule("Invalid date/time".to_string()))?;
  if scheduled < now + Duration::minutes(MIN_LEAD_MINUTES) {
    return Err(AppError::InvalidSchedule(
      "Scheduled time must be at least 45 mins from now.".to_string(),
    ));
  }
  Ok(scheduled)
}

/// Builds the delivery plan for a checkout request.
pub fn plan_from_request(delivery_type: DeliveryType, scheduled_at: Option<&str>, now: DateTime<Utc>) -> Result<DeliveryPlan> {
  match delivery_type {
    DeliveryType::Now => Ok(DeliveryPlan::now()),
    DeliveryType::Scheduled => Ok(DeliveryPlan {
      delivery_type,
      scheduled_at: Some(validate_schedule(scheduled_at, now)?),
    }),
  }
}

pub fn compute_eta(plan: DeliveryPlan, total_cents: i64, now: DateTime<Utc>) -> EtaWindow {
  if let (DeliveryType::Scheduled, Some(at)) = (plan.delivery_type, plan.scheduled_at) {
    return EtaWindow {
      start: at - Duration::minutes(5),
      end: at + Duration::minutes(15),
    };
  }
  let (min, max) = if total_cents >= EXPRESS_THRESHOLD_CENTS { (20, 30) } else { (25, 35) };
  EtaWindow {
    start: now + Duration::minutes(min),
    end: now + Duration::minutes(max),
  }
}

/// Moves a paid order one delivery stage forward.
#[instrument(name = "delivery::advance", skip(stores))]
pub async fn advance_delivery(stores: &Stores, order_id: Uuid) -> Result<Order> {
  let order = stores
    .orders
    .get(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found.", order_id)))?;
  if !order.payment_status.is_fulfillable() {
    return Err(AppError::Conflict("Only paid orders can be delivered.".to_string()));
  }
  let next = order
    .delivery_status
    .next()
    .ok_or_else(|| AppError::Conflict("Order has already been delivered.".to_string()))?;
  let updated = stores
    .orders
    .set_delivery_status(order_id, order.delivery_status, next)
    .await?
    .ok_or_else(|| AppError::Conflict("Delivery status changed concurrently; reload and retry.".to_string()))?;
  info!(%order_id, status = ?updated.delivery_status, "Delivery advanced.");
  Ok(updated)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn schedule_needs_lead_time() {
    let now = Utc::now();
    let soon = (now + Duration::minutes(30)).to_rfc3339();
    let later = (now + Duration::minutes(60)).to_rfc3339();
    assert!(matches!(validate_schedule(None, now), Err(AppError::InvalidSchedule(m)) if m == "Scheduled time required."));
    assert!(matches!(validate_schedule(Some("tomorrow"), now), Err(AppError::InvalidSchedule(m)) if m == "Invalid date/time"));
    assert!(validate_schedule(Some(&soon), now).is_err());
    assert!(validate_schedule(Some(&later), now).is_ok());
  }

  #[test]
  fn larger_baskets_arrive_sooner() {
    let now = Utc::now();
    let small = compute_eta(DeliveryPlan::now(), 1000, now);
    let large = compute_eta(DeliveryPlan::now(), 3000, now);
    assert_eq!(small.start - now, Duration::minutes(25));
    assert_eq!(large.end - now, Duration::minutes(30));
  }

  #[test]
  fn scheduled_window_brackets_the_slot() {
    let now = Utc::now();
    let at = now + Duration::hours(2);
    let eta = compute_eta(
      DeliveryPlan {
        delivery_type: DeliveryType::Scheduled,
        scheduled_at: Some(at),
      },
      0,
      now,
    );
    assert_eq!(eta.start, at - Duration::minutes(5));
    assert_eq!(eta.end, at + Duration::minutes(15));
  }
}
