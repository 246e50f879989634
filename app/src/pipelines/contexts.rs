// app/src/pipelines/contexts.rs

//! Context data carried through each saga. Handlers receive these wrapped in
//! `tallyflow::ContextData`.

use actix_web::web::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::gateway::{CapturedPayment, CreatedIntent, PaymentFlow, RefundReceipt, WebhookEvent};
use crate::intents::PendingIntent;
use crate::models::{AccountIdentity, CartLine, DeliveryType, LineItem, Order, PaymentMethod, Product};
use crate::services::benefits::BenefitQuote;
use crate::services::delivery::DeliveryPlan;
use crate::services::promo::PromoOutcome;
use crate::services::refunds::{RefundClaim, RefundMode, RefundScope};
use crate::state::AppState;

// --- Cart ---

pub struct AddToCartCtxData {
  pub app_state: AppState,
  pub account_id: Uuid,
  pub product_id: Uuid,
  pub quantity: i32,
  pub product: Option<Product>,
  /// Units taken from stock by this run; released again on compensation.
  pub reserved_units: i32,
  pub updated_line: Option<CartLine>,
}

// --- Checkout ---

pub struct CheckoutCtxData {
  pub app_state: AppState,
  pub account: AccountIdentity,
  pub method: PaymentMethod,
  pub delivery_type: DeliveryType,
  pub scheduled_at_raw: Option<String>,
  pub promo_code: Option<String>,
  pub now: DateTime<Utc>,
  pub attempt_id: String,
  pub delivery: Option<DeliveryPlan>,
  pub lines: Vec<LineItem>,
  pub benefits: Option<BenefitQuote>,
  pub promo: Option<PromoOutcome>,
  pub total_cents: i64,
  pub flow: Option<PaymentFlow>,
  pub created: Option<CreatedIntent>,
  pub pending_order_id: Option<Uuid>,
}

// --- Finalize ---

/// Where the order lines came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
  /// The order already existed with its lines.
  Persisted,
  LiveCart,
  Snapshot,
  GatewayEcho,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeOutcome {
  Created,
  /// A PENDING order for this payment was promoted to PAID.
  Updated,
  /// The payment had already been finalized; nothing was written.
  AlreadyFinalized,
}

pub struct FinalizeCtxData {
  pub app_state: AppState,
  pub method: PaymentMethod,
  pub payment: CapturedPayment,
  pub account_id: Option<Uuid>,
  pub snapshot: Option<PendingIntent>,
  pub existing: Option<Order>,
  pub lines: Vec<LineItem>,
  pub line_source: Option<LineSource>,
  pub order: Option<Order>,
  pub outcome: Option<FinalizeOutcome>,
  pub cart_cleared: bool,
  pub ledger_recorded: bool,
}

// --- Webhook ---

pub struct WebhookCtxData {
  pub app_state: AppState,
  pub raw_payload: Bytes,
  pub signature_header: Option<String>,
  /// Unix seconds.
  pub received_at: i64,
  pub event: Option<WebhookEvent>,
  pub finalized_order_id: Option<Uuid>,
  pub outcome: Option<FinalizeOutcome>,
}

// --- Refund approval ---

pub struct RefundApprovalCtxData {
  pub app_state: AppState,
  pub order_id: Uuid,
  pub reviewer: AccountIdentity,
  pub mode: RefundMode,
  pub scope: RefundScope,
  pub override_cents: Option<i64>,
  pub note: Option<String>,
  pub claim: Option<RefundClaim>,
  pub order: Option<Order>,
  pub amount_cents: i64,
  pub target_ref: Option<String>,
  pub receipt: Option<RefundReceipt>,
  pub wallet_credited: bool,
  pub resolved: Option<Order>,
}
