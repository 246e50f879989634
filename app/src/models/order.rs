// app/src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
  Pending,
  Processing,
  Paid,
  Failed,
  Cancelled,
  PartialRefund,
  Refunded,
}

impl PaymentStatus {
  /// Still waiting on the gateway; subject to the expiry sweep.
  pub fn is_awaiting_payment(self) -> bool {
    matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
  }

  /// Money has been captured at some point. A settled order is never moved back to PAID.
  pub fn is_settled(self) -> bool {
    matches!(
      self,
      PaymentStatus::Paid | PaymentStatus::PartialRefund | PaymentStatus::Refunded
    )
  }

  pub fn accepts_refund_request(self) -> bool {
    matches!(self, PaymentStatus::Paid | PaymentStatus::PartialRefund)
  }

  /// Orders in these states are out for fulfillment.
  pub fn is_fulfillable(self) -> bool {
    matches!(self, PaymentStatus::Paid | PaymentStatus::PartialRefund)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PaymentStatus::Pending => "PENDING",
      PaymentStatus::Processing => "PROCESSING",
      PaymentStatus::Paid => "PAID",
      PaymentStatus::Failed => "FAILED",
      PaymentStatus::Cancelled => "CANCELLED",
      PaymentStatus::PartialRefund => "PARTIAL_REFUND",
      PaymentStatus::Refunded => "REFUNDED",
    }
  }
}

impl fmt::Display for PaymentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Supported payment providers. The variant doubles as the first half of the
/// `(payment_method, payment_reference)` idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
  /// Hosted card checkout with a redirect back to us and a webhook.
  Stripe,
  /// QR code the customer scans; confirmed by polling.
  NetsQr,
  /// Buyer approval followed by a server-side capture.
  Paypal,
}

impl PaymentMethod {
  pub fn is_refundable(self) -> bool {
    matches!(self, PaymentMethod::Stripe | PaymentMethod::Paypal)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PaymentMethod::Stripe => "STRIPE",
      PaymentMethod::NetsQr => "NETS_QR",
      PaymentMethod::Paypal => "PAYPAL",
    }
  }
}

impl fmt::Display for PaymentMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PaymentMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
      "stripe" | "card" => Ok(PaymentMethod::Stripe),
      "nets_qr" | "nets" | "netsqr" => Ok(PaymentMethod::NetsQr),
      "paypal" => Ok(PaymentMethod::Paypal),
      other => Err(format!("Unsupported payment method '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "refund_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
  #[sqlx(rename = "NONE")]
  #[serde(rename = "NONE")]
  NotRequested,
  Requested,
  Approved,
  Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "delivery_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryType {
  Now,
  Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "delivery_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
  Preparing,
  OutForDelivery,
  Delivered,
}

impl DeliveryStatus {
  pub fn next(self) -> Option<DeliveryStatus> {
    match self {
      DeliveryStatus::Preparing => Some(DeliveryStatus::OutForDelivery),
      DeliveryStatus::OutForDelivery => Some(DeliveryStatus::Delivered),
      DeliveryStatus::Delivered => None,
    }
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Order {
  pub id: Uuid,
  pub account_id: Uuid,

  pub subtotal_cents: i64,
  pub delivery_fee_cents: i64,
  pub benefit_discount_cents: i64,
  pub promo_code: Option<String>,
  pub promo_discount_cents: i64,
  pub total_amount_cents: i64,
  pub currency: String,

  pub payment_method: Option<PaymentMethod>,
  pub payment_status: PaymentStatus,
  pub payment_reference: Option<String>,
  pub payer_email: Option<String>,
  pub paid_at: Option<DateTime<Utc>>,

  pub delivery_type: DeliveryType,
  pub scheduled_at: Option<DateTime<Utc>>,
  pub eta_window_start: Option<DateTime<Utc>>,
  pub eta_window_end: Option<DateTime<Utc>>,
  pub delivery_status: DeliveryStatus,

  pub refund_status: RefundStatus,
  pub refund_reason: Option<String>,
  pub refund_requested_at: Option<DateTime<Utc>>,
  pub refund_reviewed_at: Option<DateTime<Utc>>,
  pub refunded_amount_cents: i64,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  pub fn refundable_remaining_cents(&self) -> i64 {
    (self.total_amount_cents - self.refunded_amount_cents).max(0)
  }
}

/// Row to insert. `payment_reference` is the idempotency key together with `payment_method`.
#[derive(Debug, Clone)]
pub struct NewOrder {
  pub id: Uuid,
  pub account_id: Uuid,
  pub subtotal_cents: i64,
  pub delivery_fee_cents: i64,
  pub benefit_discount_cents: i64,
  pub promo_code: Option<String>,
  pub promo_discount_cents: i64,
  pub total_amount_cents: i64,
  pub currency: String,
  pub payment_method: PaymentMethod,
  pub payment_status: PaymentStatus,
  pub payment_reference: String,
  pub payer_email: Option<String>,
  pub paid_at: Option<DateTime<Utc>>,
  pub delivery_type: DeliveryType,
  pub scheduled_at: Option<DateTime<Utc>>,
  pub eta_window_start: Option<DateTime<Utc>>,
  pub eta_window_end: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl NewOrder {
  pub fn into_order(self) -> Order {
    Order {
      id: self.id,
      account_id: self.account_id,
      subtotal_cents: self.subtotal_cents,
      delivery_fee_cents: self.delivery_fee_cents,
      benefit_discount_cents: self.benefit_discount_cents,
      promo_code: self.promo_code,
      promo_discount_cents: self.promo_discount_cents,
      total_amount_cents: self.total_amount_cents,
      currency: self.currency,
      payment_method: Some(self.payment_method),
      payment_status: self.payment_status,
      payment_reference: Some(self.payment_reference),
      payer_email: self.payer_email,
      paid_at: self.paid_at,
      delivery_type: self.delivery_type,
      scheduled_at: self.scheduled_at,
      eta_window_start: self.eta_window_start,
      eta_window_end: self.eta_window_end,
      delivery_status: DeliveryStatus::Preparing,
      refund_status: RefundStatus::NotRequested,
      refund_reason: None,
      refund_requested_at: None,
      refund_reviewed_at: None,
      refunded_amount_cents: 0,
      created_at: self.created_at,
      updated_at: self.created_at,
    }
  }
}

/// Promotes an existing unsettled order to PAID. `None` fields keep the stored value.
#[derive(Debug, Clone)]
pub struct PaidUpdate {
  pub paid_at: DateTime<Utc>,
  pub payer_email: Option<String>,
  pub delivery_type: Option<DeliveryType>,
  pub scheduled_at: Option<DateTime<Utc>>,
  pub eta_window_start: Option<DateTime<Utc>>,
  pub eta_window_end: Option<DateTime<Utc>>,
  pub promo_code: Option<String>,
  pub promo_discount_cents: Option<i64>,
}

/// Payment facts copied from the ledger by the reconciler. Only fills empty columns.
#[derive(Debug, Clone)]
pub struct PaymentSync {
  pub payment_method: Option<PaymentMethod>,
  pub payment_reference: Option<String>,
  pub payer_email: Option<String>,
  pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RefundResolution {
  Approved {
    refunded_total_cents: i64,
    payment_status: PaymentStatus,
    reviewed_at: DateTime<Utc>,
  },
  Rejected {
    reviewed_at: DateTime<Utc>,
  },
}
