// app/src/gateway/stripe.rs

//! Redirect checkout through Stripe Checkout Sessions, plus webhook
//! signature verification.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use super::{CapturedPayment, CreatedIntent, IntentRequest, PaymentFlow, PaymentGateway, RefundReceipt, RemoteStatus};
use crate::config::StripeConfig;
use crate::errors::{AppError, Result};
use crate::models::{LineItem, PaymentMethod};

type HmacSha256 = Hmac<Sha256>;

const PROVIDER: &str = "STRIPE";
const LINE_KIND_DELIVERY: &str = "delivery_fee";

#[derive(Debug, Deserialize)]
struct SessionCreated {
  id: String,
  url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckoutSession {
  pub id: String,
  #[serde(default)]
  pub payment_status: String,
  #[serde(default)]
  pub status: Option<String>,
  pub amount_total: Option<i64>,
  pub currency: Option<String>,
  pub customer: Option<String>,
  pub customer_email: Option<String>,
  pub customer_details: Option<CustomerDetails>,
  pub client_reference_id: Option<String>,
  pub payment_intent: Option<String>,
  pub line_items: Option<ListOf<SessionLine>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CustomerDetails {
  pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListOf<T> {
  pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionLine {
  pub description: Option<String>,
  pub quantity: Option<i32>,
  pub amount_total: Option<i64>,
  pub price: Option<SessionPrice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionPrice {
  pub unit_amount: Option<i64>,
  pub product: Option<SessionProduct>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionProduct {
  pub name: Option<String>,
  #[serde(default)]
  pub metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RefundCreated {
  id: String,
  status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
  message: Option<String>,
  code: Option<String>,
}

impl CheckoutSession {
  fn payer_email(&self) -> Option<String> {
    self
      .customer_details
      .as_ref()
      .and_then(|d| d.email.clone())
      .or_else(|| self.customer_email.clone())
  }

  fn echo_lines(&self) -> Vec<LineItem> {
    let Some(lines) = &self.line_items else {
      return Vec::new();
    };
    lines
      .data
      .iter()
      .filter_map(|line| {
        let product = line.price.as_ref().and_then(|p| p.product.as_ref());
        if product.and_then(|p| p.metadata.get("kind")).map(String::as_str) == Some(LINE_KIND_DELIVERY) {
          return None;
        }
        let quantity = line.quantity.unwrap_or(1).max(1);
        let unit_price_cents = line
          .price
          .as_ref()
          .and_then(|p| p.unit_amount)
          .or_else(|| line.amount_total.map(|t| t / i64::from(quantity)))?;
        let product_name = product
          .and_then(|p| p.name.clone())
          .or_else(|| line.description.clone())
          .unwrap_or_else(|| "Item".to_string());
        let product_id = product
          .and_then(|p| p.metadata.get("product_id"))
          .and_then(|id| uuid::Uuid::parse_str(id).ok());
        Some(LineItem {
          product_id,
          product_name,
          unit_price_cents,
          quantity,
        })
      })
      .collect()
  }

  pub(crate) fn into_captured(self) -> CapturedPayment {
    let echo_lines = self.echo_lines();
    let payer_email = self.payer_email();
    CapturedPayment {
      payer_id: self.customer.or(self.client_reference_id),
      payer_email,
      amount_cents: self.amount_total,
      currency: self.currency.map(|c| c.to_ascii_uppercase()),
      captured_at: Utc::now(),
      capture_id: self.payment_intent,
      echo_lines,
      provider_ref: self.id,
    }
  }
}

pub struct StripeGateway {
  client: Client,
  secret_key: Option<String>,
  api_base: String,
}

impl StripeGateway {
  pub fn new(client: Client, config: &StripeConfig) -> Self {
    Self {
      client,
      secret_key: config.secret_key.clone(),
      api_base: config.api_base.trim_end_matches('/').to_string(),
    }
  }

  fn secret_key(&self) -> Result<&str> {
    self
      .secret_key
      .as_deref()
      .ok_or_else(|| AppError::gateway_unavailable(PROVIDER, "STRIPE_SECRET_KEY is not configured"))
  }

  async fn error_text(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
      Ok(env) => env
        .error
        .message
        .or(env.error.code)
        .unwrap_or_else(|| format!("HTTP {}", status)),
      Err(_) => format!("HTTP {}", status),
    }
  }

  async fn retrieve_session(&self, session_id: &str) -> Result<Option<CheckoutSession>> {
    let key = self.secret_key()?;
    let response = self
      .client
      .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
      .basic_auth(key, None::<&str>)
      .query(&[("expand[]", "line_items.data.price.product")])
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !response.status().is_success() {
      return Err(AppError::gateway_unavailable(PROVIDER, Self::error_text(response).await));
    }
    let session = response
      .json::<CheckoutSession>()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Unreadable session: {}", e)))?;
    Ok(Some(session))
  }

  /// Lines sent to the hosted page. Itemised when products plus delivery add up
  /// to the charge, otherwise a single summary line carrying the discounted total.
  fn checkout_lines(request: &IntentRequest) -> Vec<CheckoutLine> {
    let items_total: i64 = request.lines.iter().map(LineItem::line_total_cents).sum();
    if items_total + request.delivery_fee_cents != request.amount_cents {
      return vec![CheckoutLine {
        name: format!("Order {}", request.attempt_id),
        unit_amount: request.amount_cents,
        quantity: 1,
        product_id: None,
        kind: None,
      }];
    }
    let mut lines: Vec<CheckoutLine> = request
      .lines
      .iter()
      .map(|l| CheckoutLine {
        name: l.product_name.clone(),
        unit_amount: l.unit_price_cents,
        quantity: l.quantity,
        product_id: l.product_id.map(|id| id.to_string()),
        kind: None,
      })
      .collect();
    if request.delivery_fee_cents > 0 {
      lines.push(CheckoutLine {
        name: "Delivery fee".to_string(),
        unit_amount: request.delivery_fee_cents,
        quantity: 1,
        product_id: None,
        kind: Some(LINE_KIND_DELIVERY),
      });
    }
    lines
  }
}

struct CheckoutLine {
  name: String,
  unit_amount: i64,
  quantity: i32,
  product_id: Option<String>,
  kind: Option<&'static str>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
  fn method(&self) -> PaymentMethod {
    PaymentMethod::Stripe
  }

  fn flow(&self) -> PaymentFlow {
    PaymentFlow::RedirectCheckout
  }

  #[instrument(name = "stripe::create_intent", skip_all, fields(attempt_id = %request.attempt_id, amount = request.amount_cents))]
  async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent> {
    let key = self.secret_key()?;
    let currency = request.currency.to_ascii_lowercase();

    let mut form: Vec<(String, String)> = vec![
      ("mode".into(), "payment".into()),
      ("success_url".into(), request.return_url.clone()),
      ("cancel_url".into(), request.cancel_url.clone()),
      ("client_reference_id".into(), request.account_id.to_string()),
      ("metadata[attempt_id]".into(), request.attempt_id.clone()),
    ];
    if let Some(email) = &request.customer_email {
      form.push(("customer_email".into(), email.clone()));
    }
    for (i, line) in Self::checkout_lines(request).into_iter().enumerate() {
      let prefix = format!("line_items[{}]", i);
      form.push((format!("{}[price_data][currency]", prefix), currency.clone()));
      form.push((format!("{}[price_data][unit_amount]", prefix), line.unit_amount.to_string()));
      form.push((format!("{}[price_data][product_data][name]", prefix), line.name));
      if let Some(product_id) = line.product_id {
        form.push((format!("{}[price_data][product_data][metadata][product_id]", prefix), product_id));
      }
      if let Some(kind) = line.kind {
        form.push((format!("{}[price_data][product_data][metadata][kind]", prefix), kind.to_string()));
      }
      form.push((format!("{}[quantity]", prefix), line.quantity.to_string()));
    }

    let response = self
      .client
      .post(format!("{}/v1/checkout/sessions", self.api_base))
      .basic_auth(key, None::<&str>)
      .form(&form)
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;

    if !response.status().is_success() {
      return Err(AppError::gateway_unavailable(PROVIDER, Self::error_text(response).await));
    }
    let session: SessionCreated = response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Unreadable session: {}", e)))?;

    debug!(session_id = %session.id, "Checkout session created.");
    Ok(CreatedIntent {
      provider_ref: session.id,
      redirect_url: session.url,
      qr_code: None,
    })
  }

  #[instrument(name = "stripe::capture_intent", skip(self))]
  async fn capture_intent(&self, provider_ref: &str) -> Result<CapturedPayment> {
    let session = self
      .retrieve_session(provider_ref)
      .await?
      .ok_or_else(|| AppError::not_completed(PROVIDER, "not_found"))?;
    if session.payment_status != "paid" {
      return Err(AppError::not_completed(PROVIDER, session.payment_status));
    }
    Ok(session.into_captured())
  }

  #[instrument(name = "stripe::query_intent", skip(self))]
  async fn query_intent(&self, provider_ref: &str) -> Result<RemoteStatus> {
    let Some(session) = self.retrieve_session(provider_ref).await? else {
      return Ok(RemoteStatus::Pending);
    };
    Ok(match (session.payment_status.as_str(), session.status.as_deref()) {
      ("paid", _) => RemoteStatus::Paid,
      (_, Some("expired")) => RemoteStatus::Failed,
      _ => RemoteStatus::Pending,
    })
  }

  #[instrument(name = "stripe::refund", skip(self))]
  async fn refund(&self, reference: &str, amount_cents: Option<i64>, _currency: &str) -> Result<RefundReceipt> {
    let key = self
      .secret_key()
      .map_err(|_| AppError::refund_failed(PROVIDER, "STRIPE_SECRET_KEY is not configured"))?;

    // Refunds target the payment intent; a session id is resolved to its intent first.
    let payment_intent = if reference.starts_with("cs_") {
      self
        .retrieve_session(reference)
        .await?
        .and_then(|s| s.payment_intent)
        .ok_or_else(|| AppError::refund_failed(PROVIDER, "checkout session has no payment intent"))?
    } else {
      reference.to_string()
    };

    let mut form = vec![("payment_intent".to_string(), payment_intent)];
    if let Some(amount) = amount_cents {
      form.push(("amount".to_string(), amount.to_string()));
    }

    let response = self
      .client
      .post(format!("{}/v1/refunds", self.api_base))
      .basic_auth(key, None::<&str>)
      .form(&form)
      .send()
      .await
      .map_err(|e| AppError::refund_failed(PROVIDER, e.to_string()))?;

    if !response.status().is_success() {
      return Err(AppError::refund_failed(PROVIDER, Self::error_text(response).await));
    }
    let refund: RefundCreated = response
      .json()
      .await
      .map_err(|e| AppError::refund_failed(PROVIDER, format!("Unreadable refund: {}", e)))?;
    if refund.status == "failed" || refund.status == "canceled" {
      return Err(AppError::refund_failed(PROVIDER, format!("refund {}", refund.status)));
    }
    Ok(RefundReceipt {
      refund_id: refund.id,
      status: refund.status,
    })
  }
}

/// Events the webhook endpoint acts on.
#[derive(Debug)]
pub enum WebhookEvent {
  CheckoutCompleted {
    payment: CapturedPayment,
    /// Our account id, echoed back as `client_reference_id`.
    account_id: Option<uuid::Uuid>,
  },
  Ignored(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
  #[serde(rename = "type")]
  event_type: String,
  data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
  object: serde_json::Value,
}

/// Verifies `Stripe-Signature` headers (`t=<unix>,v1=<hex hmac>`).
#[derive(Clone)]
pub struct WebhookVerifier {
  secret: Option<String>,
}

impl WebhookVerifier {
  /// Maximum age of a signed timestamp, in seconds.
  pub const TOLERANCE_SECS: i64 = 300;

  pub fn new(secret: Option<String>) -> Self {
    Self { secret }
  }

  /// Checks the signature against `now` (unix seconds).
  pub fn verify(&self, payload: &[u8], signature_header: &str, now: i64) -> Result<()> {
    let secret = self
      .secret
      .as_deref()
      .ok_or_else(|| AppError::gateway_unavailable(PROVIDER, "STRIPE_WEBHOOK_SECRET is not configured"))?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in signature_header.split(',') {
      if let Some(t) = part.trim().strip_prefix("t=") {
        timestamp = Some(t);
      } else if let Some(s) = part.trim().strip_prefix("v1=") {
        signatures.push(s);
      }
    }

    let timestamp_str = timestamp.ok_or_else(|| AppError::Auth("Invalid webhook signature format.".to_string()))?;
    if signatures.is_empty() {
      return Err(AppError::Auth("Invalid webhook signature format.".to_string()));
    }
    let timestamp: i64 = timestamp_str
      .parse()
      .map_err(|_| AppError::Auth("Invalid webhook signature timestamp.".to_string()))?;

    let age = now - timestamp;
    if age > Self::TOLERANCE_SECS || age < -Self::TOLERANCE_SECS {
      warn!(age, "Webhook rejected: timestamp outside tolerance.");
      return Err(AppError::Auth("Webhook signature expired.".to_string()));
    }

    let matched = signatures.iter().any(|sig| {
      let Ok(expected) = hex::decode(sig) else {
        return false;
      };
      let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
      };
      mac.update(timestamp_str.as_bytes());
      mac.update(b".");
      mac.update(payload);
      mac.verify_slice(&expected).is_ok()
    });

    if !matched {
      warn!("Webhook rejected: signature mismatch.");
      return Err(AppError::Auth("Webhook signature verification failed.".to_string()));
    }
    Ok(())
  }

  pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent> {
    let event: RawEvent =
      serde_json::from_slice(payload).map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;
    if event.event_type != "checkout.session.completed" {
      return Ok(WebhookEvent::Ignored(event.event_type));
    }
    let session: CheckoutSession = serde_json::from_value(event.data.object)
      .map_err(|e| AppError::Validation(format!("Invalid checkout session in webhook: {}", e)))?;
    if session.payment_status != "paid" {
      return Ok(WebhookEvent::Ignored(format!(
        "checkout.session.completed ({})",
        session.payment_status
      )));
    }
    let account_id = session
      .client_reference_id
      .as_deref()
      .and_then(|id| uuid::Uuid::parse_str(id).ok());
    Ok(WebhookEvent::CheckoutCompleted {
      payment: session.into_captured(),
      account_id,
    })
  }
}
