// app/src/models/transaction.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

use super::order::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "ledger_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
  Completed,
  Paid,
  RefundRequested,
  Refunded,
  RefundRejected,
  Failed,
}

impl LedgerStatus {
  pub fn is_settled_payment(self) -> bool {
    matches!(self, LedgerStatus::Completed | LedgerStatus::Paid)
  }
}

/// Append-only audit row. The latest entry per order drives the refund view.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LedgerEntry {
  pub id: Uuid,
  pub order_id: Uuid,
  pub payer_id: Option<String>,
  pub payer_email: Option<String>,
  pub amount_cents: i64,
  pub currency: String,
  pub status: LedgerStatus,
  pub payment_method: Option<PaymentMethod>,
  pub payment_reference: Option<String>,
  pub capture_id: Option<String>,
  pub refund_id: Option<String>,
  pub refund_note: Option<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
  pub order_id: Uuid,
  pub payer_id: Option<String>,
  pub payer_email: Option<String>,
  pub amount_cents: i64,
  pub currency: String,
  pub status: LedgerStatus,
  pub payment_method: Option<PaymentMethod>,
  pub payment_reference: Option<String>,
  pub capture_id: Option<String>,
  pub refund_id: Option<String>,
  pub refund_note: Option<String>,
}

impl NewLedgerEntry {
  pub fn new(order_id: Uuid, status: LedgerStatus, amount_cents: i64, currency: impl Into<String>) -> Self {
    Self {
      order_id,
      payer_id: None,
      payer_email: None,
      amount_cents,
      currency: currency.into(),
      status,
      payment_method: None,
      payment_reference: None,
      capture_id: None,
      refund_id: None,
      refund_note: None,
    }
  }

  pub fn with_payment(mut self, method: Option<PaymentMethod>, reference: Option<String>) -> Self {
    self.payment_method = method;
    self.payment_reference = reference;
    self
  }

  pub fn with_payer(mut self, payer_id: Option<String>, payer_email: Option<String>) -> Self {
    self.payer_id = payer_id;
    self.payer_email = payer_email;
    self
  }

  pub fn with_capture(mut self, capture_id: Option<String>) -> Self {
    self.capture_id = capture_id;
    self
  }

  pub fn with_refund(mut self, refund_id: Option<String>, note: Option<String>) -> Self {
    self.refund_id = refund_id;
    self.refund_note = note;
    self
  }

  pub fn into_entry(self, created_at: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry {
      id: Uuid::new_v4(),
      order_id: self.order_id,
      payer_id: self.payer_id,
      payer_email: self.payer_email,
      amount_cents: self.amount_cents,
      currency: self.currency,
      status: self.status,
      payment_method: self.payment_method,
      payment_reference: self.payment_reference,
      capture_id: self.capture_id,
      refund_id: self.refund_id,
      refund_note: self.refund_note,
      created_at,
    }
  }
}
