// app/src/models/cart_item.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One product line in an account's cart. Name and price are captured when the
/// line is first added so a cart can be priced without another catalog read.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartLine {
  pub account_id: Uuid,
  pub product_id: Uuid,
  pub product_name: String,
  pub unit_price_cents: i64,
  pub quantity: i32,
  pub added_at: DateTime<Utc>,
}

impl CartLine {
  pub fn line_total_cents(&self) -> i64 {
    self.unit_price_cents * i64::from(self.quantity)
  }
}

pub fn subtotal_cents(lines: &[CartLine]) -> i64 {
  lines.iter().map(CartLine::line_total_cents).sum()
}
