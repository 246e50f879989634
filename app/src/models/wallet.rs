// app/src/models/wallet.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Signed wallet movement: credits are positive, reversals negative.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WalletEntry {
  pub id: Uuid,
  pub account_id: Uuid,
  pub amount_cents: i64,
  pub reference: String,
  pub created_at: DateTime<Utc>,
}
