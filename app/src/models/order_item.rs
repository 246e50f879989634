// app/src/models/order_item.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::cart_item::CartLine;

/// A priced line before it is attached to an order: taken from the live cart,
/// from a pending-intent snapshot, or from a gateway's line-item echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
  // Gateway echoes may not carry our product id.
  pub product_id: Option<Uuid>,
  pub product_name: String,
  pub unit_price_cents: i64,
  pub quantity: i32,
}

impl LineItem {
  pub fn line_total_cents(&self) -> i64 {
    self.unit_price_cents * i64::from(self.quantity)
  }
}

impl From<&CartLine> for LineItem {
  fn from(line: &CartLine) -> Self {
    Self {
      product_id: Some(line.product_id),
      product_name: line.product_name.clone(),
      unit_price_cents: line.unit_price_cents,
      quantity: line.quantity,
    }
  }
}

pub fn items_total_cents(items: &[LineItem]) -> i64 {
  items.iter().map(LineItem::line_total_cents).sum()
}

/// Immutable snapshot of a line as it was sold.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OrderLine {
  pub id: Uuid,
  pub order_id: Uuid,
  pub product_id: Option<Uuid>,
  pub product_name: String,
  pub unit_price_cents: i64,
  pub quantity: i32,
}

impl OrderLine {
  pub fn line_total_cents(&self) -> i64 {
    self.unit_price_cents * i64::from(self.quantity)
  }
}
