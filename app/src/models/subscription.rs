// app/src/models/subscription.rs

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "subscription_plan", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
  Basic,
  Premium,
}

impl Plan {
  pub fn monthly_price_cents(self) -> i64 {
    match self {
      Plan::Basic => 499,
      Plan::Premium => 999,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Plan::Basic => "BASIC",
      Plan::Premium => "PREMIUM",
    }
  }
}

impl FromStr for Plan {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "BASIC" => Ok(Plan::Basic),
      "PREMIUM" => Ok(Plan::Premium),
      other => Err(format!("Unknown plan '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "subscription_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
  Active,
  Cancelled,
  Expired,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subscription {
  pub id: Uuid,
  pub account_id: Uuid,
  pub plan: Plan,
  pub status: SubscriptionStatus,
  pub start_date: DateTime<Utc>,
  pub end_date: DateTime<Utc>,
  pub auto_renew: bool,
  pub cancel_at_period_end: bool,
  pub updated_at: DateTime<Utc>,
}

impl Subscription {
  pub fn start(account_id: Uuid, plan: Plan, now: DateTime<Utc>) -> Self {
    Self {
      id: Uuid::new_v4(),
      account_id,
      plan,
      status: SubscriptionStatus::Active,
      start_date: now,
      end_date: add_billing_period(now),
      auto_renew: true,
      cancel_at_period_end: false,
      updated_at: now,
    }
  }

  /// Whether benefits apply at `now`. A cancelled row keeps its benefits
  /// until the prepaid period runs out.
  pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
    match self.status {
      SubscriptionStatus::Active => self.end_date >= now,
      SubscriptionStatus::Cancelled => self.end_date > now,
      SubscriptionStatus::Expired => false,
    }
  }
}

/// One calendar month; month-end dates clamp to the last day of the next month.
pub fn add_billing_period(from: DateTime<Utc>) -> DateTime<Utc> {
  from.checked_add_months(Months::new(1)).unwrap_or(from)
}
