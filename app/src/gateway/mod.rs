// app/src/gateway/mod.rs

//! Payment gateway adapters.
//!
//! Each provider is wrapped behind [`PaymentGateway`]: create an intent,
//! capture it, query its status and refund it. Provider wire formats stay
//! inside the adapter; callers only see the types below and the gateway
//! variants of [`AppError`](crate::errors::AppError).

pub mod mock;
pub mod nets;
pub mod paypal;
pub mod poll;
pub mod stripe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::models::{LineItem, PaymentMethod};

pub use mock::MockGateway;
pub use nets::NetsGateway;
pub use paypal::PaypalGateway;
pub use stripe::{StripeGateway, WebhookEvent, WebhookVerifier};

/// How a provider tells us a payment went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFlow {
  /// Customer is redirected to a hosted page; we learn the outcome from the return URL or a webhook.
  RedirectCheckout,
  /// Customer scans a QR code; we poll for the outcome.
  QrPoll,
  /// Customer approves with the provider; we capture server-side.
  DirectCapture,
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
  /// Our correlation id for this attempt, echoed back by providers that support it.
  pub attempt_id: String,
  pub account_id: uuid::Uuid,
  pub customer_email: Option<String>,
  pub amount_cents: i64,
  pub currency: String,
  pub lines: Vec<LineItem>,
  pub delivery_fee_cents: i64,
  pub return_url: String,
  pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedIntent {
  pub provider_ref: String,
  /// Where to send the customer, for redirect and approval flows.
  pub redirect_url: Option<String>,
  /// Raw QR payload, for QR flows.
  pub qr_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
  Pending,
  Paid,
  Failed,
}

/// A payment the provider reports as successfully taken.
#[derive(Debug, Clone)]
pub struct CapturedPayment {
  pub provider_ref: String,
  pub payer_id: Option<String>,
  pub payer_email: Option<String>,
  /// `None` when the provider does not report the amount on capture.
  pub amount_cents: Option<i64>,
  pub currency: Option<String>,
  pub captured_at: DateTime<Utc>,
  /// Provider id to refund against, when it differs from `provider_ref`.
  pub capture_id: Option<String>,
  /// The provider's own copy of what was bought. Last-resort source for the order lines.
  pub echo_lines: Vec<LineItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
  pub refund_id: String,
  pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  fn method(&self) -> PaymentMethod;

  fn flow(&self) -> PaymentFlow;

  /// Fails with `GatewayUnavailable` before any network call when credentials are missing.
  async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent>;

  /// Fails with `PaymentNotCompleted` unless the provider reports its success state.
  async fn capture_intent(&self, provider_ref: &str) -> Result<CapturedPayment>;

  /// A provider 404 is reported as `Pending`: the record may not exist yet.
  async fn query_intent(&self, provider_ref: &str) -> Result<RemoteStatus>;

  /// `amount_cents = None` refunds in full.
  async fn refund(&self, reference: &str, amount_cents: Option<i64>, currency: &str) -> Result<RefundReceipt>;
}

/// Gateways by payment method, plus the redirect provider's webhook verifier.
#[derive(Clone)]
pub struct GatewayRegistry {
  gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
  webhook_verifier: WebhookVerifier,
}

impl GatewayRegistry {
  pub fn new(webhook_verifier: WebhookVerifier) -> Self {
    Self {
      gateways: HashMap::new(),
      webhook_verifier,
    }
  }

  /// Builds the three live adapters. Missing credentials do not fail here.
  pub fn from_config(config: &AppConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(15))
      .build()
      .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

    let mut registry = Self::new(WebhookVerifier::new(config.stripe.webhook_secret.clone()));
    registry.register(Arc::new(StripeGateway::new(http.clone(), &config.stripe)));
    registry.register(Arc::new(NetsGateway::new(http.clone(), &config.nets)));
    registry.register(Arc::new(PaypalGateway::new(http, &config.paypal)));
    Ok(registry)
  }

  pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
    self.gateways.insert(gateway.method(), gateway);
  }

  pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>> {
    self
      .gateways
      .get(&method)
      .cloned()
      .ok_or_else(|| AppError::gateway_unavailable(method.as_str(), "no adapter registered"))
  }

  pub fn webhook_verifier(&self) -> &WebhookVerifier {
    &self.webhook_verifier
  }
}

/// `1250` -> `"12.50"`.
pub fn cents_to_decimal(cents: i64) -> String {
  let sign = if cents < 0 { "-" } else { "" };
  let abs = cents.unsigned_abs();
  format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// `"12.5"` -> `1250`. Rejects more than two decimal places.
pub fn decimal_to_cents(value: &str) -> Option<i64> {
  let value = value.trim();
  let (negative, value) = match value.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, value),
  };
  let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
  if whole.is_empty() || frac.len() > 2 || !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
    return None;
  }
  let whole: i64 = whole.parse().ok()?;
  let frac_cents: i64 = match frac.len() {
    0 => 0,
    1 => frac.parse::<i64>().ok()? * 10,
    _ => frac.parse().ok()?,
  };
  let cents = whole.checked_mul(100)?.checked_add(frac_cents)?;
  Some(if negative { -cents } else { cents })
}
