// app/src/models/promo.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An administrable promo code. Codes are stored upper-cased.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
  pub code: String,
  pub percent_off: f64,
  pub expires_at: Option<DateTime<Utc>>,
  pub active: bool,
}

impl PromoCode {
  pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
    self.active && self.expires_at.map_or(true, |exp| exp > now)
  }
}
