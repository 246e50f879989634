// app/src/gateway/paypal.rs

//! PayPal Orders v2: the buyer approves on PayPal, then we capture server-side.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{
  cents_to_decimal, decimal_to_cents, CapturedPayment, CreatedIntent, IntentRequest, PaymentFlow, PaymentGateway,
  RefundReceipt, RemoteStatus,
};
use crate::config::PaypalConfig;
use crate::errors::{AppError, Result};
use crate::models::PaymentMethod;

const PROVIDER: &str = "PAYPAL";
const ALREADY_CAPTURED: &str = "ORDER_ALREADY_CAPTURED";

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
  id: String,
  status: String,
  #[serde(default)]
  links: Vec<Link>,
  payer: Option<Payer>,
  #[serde(default)]
  purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct Link {
  href: String,
  rel: String,
}

#[derive(Debug, Deserialize)]
struct Payer {
  payer_id: Option<String>,
  email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
  payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
  #[serde(default)]
  captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
  id: String,
  amount: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct Money {
  value: String,
  currency_code: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
  id: String,
  status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
  name: Option<String>,
  message: Option<String>,
  #[serde(default)]
  details: Vec<ErrorDetail>,
  error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
  issue: Option<String>,
}

impl ErrorResponse {
  fn issue(&self) -> Option<String> {
    self.details.iter().find_map(|d| d.issue.clone()).or_else(|| self.name.clone())
  }

  fn summary(&self) -> String {
    self
      .message
      .clone()
      .or_else(|| self.error_description.clone())
      .or_else(|| self.issue())
      .unwrap_or_else(|| "unknown error".to_string())
  }
}

pub struct PaypalGateway {
  client: Client,
  client_id: Option<String>,
  client_secret: Option<String>,
  api_base: String,
}

impl PaypalGateway {
  pub fn new(client: Client, config: &PaypalConfig) -> Self {
    Self {
      client,
      client_id: config.client_id.clone(),
      client_secret: config.client_secret.clone(),
      api_base: config.api_base.trim_end_matches('/').to_string(),
    }
  }

  fn credentials(&self) -> Result<(&str, &str)> {
    match (self.client_id.as_deref(), self.client_secret.as_deref()) {
      (Some(id), Some(secret)) => Ok((id, secret)),
      _ => Err(AppError::gateway_unavailable(
        PROVIDER,
        "PAYPAL_CLIENT_ID / PAYPAL_CLIENT_SECRET are not configured",
      )),
    }
  }

  async fn access_token(&self) -> Result<String> {
    let (id, secret) = self.credentials()?;
    let response = self
      .client
      .post(format!("{}/v1/oauth2/token", self.api_base))
      .basic_auth(id, Some(secret))
      .form(&[("grant_type", "client_credentials")])
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;
    if !response.status().is_success() {
      let err = read_error(response).await;
      return Err(AppError::gateway_unavailable(PROVIDER, err.summary()));
    }
    let token: TokenResponse = response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Unreadable token response: {}", e)))?;
    Ok(token.access_token)
  }

  async fn fetch_order(&self, token: &str, provider_ref: &str) -> Result<OrderResponse> {
    let response = self
      .client
      .get(format!("{}/v2/checkout/orders/{}", self.api_base, provider_ref))
      .bearer_auth(token)
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;
    if !response.status().is_success() {
      let err = read_error(response).await;
      return Err(AppError::gateway_unavailable(PROVIDER, err.summary()));
    }
    response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Unreadable order: {}", e)))
  }
}

async fn read_error(response: reqwest::Response) -> ErrorResponse {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  serde_json::from_str(&body).unwrap_or(ErrorResponse {
    name: None,
    message: Some(format!("HTTP {}", status)),
    details: Vec::new(),
    error_description: None,
  })
}

/// A COMPLETED order, from either the capture call or a later read.
fn captured_payment(order: OrderResponse) -> Result<CapturedPayment> {
  if order.status != "COMPLETED" {
    return Err(AppError::not_completed(PROVIDER, order.status));
  }

  let capture = order
    .purchase_units
    .iter()
    .filter_map(|u| u.payments.as_ref())
    .flat_map(|p| p.captures.iter())
    .next();
  let (amount_cents, currency) = match capture.and_then(|c| c.amount.as_ref()) {
    Some(money) => (decimal_to_cents(&money.value), Some(money.currency_code.clone())),
    None => (None, None),
  };

  Ok(CapturedPayment {
    provider_ref: order.id.clone(),
    payer_id: order.payer.as_ref().and_then(|p| p.payer_id.clone()),
    payer_email: order.payer.as_ref().and_then(|p| p.email_address.clone()),
    amount_cents,
    currency,
    captured_at: Utc::now(),
    capture_id: capture.map(|c| c.id.clone()),
    echo_lines: Vec::new(),
  })
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
  fn method(&self) -> PaymentMethod {
    PaymentMethod::Paypal
  }

  fn flow(&self) -> PaymentFlow {
    PaymentFlow::DirectCapture
  }

  #[instrument(name = "paypal::create_intent", skip_all, fields(attempt_id = %request.attempt_id, amount = request.amount_cents))]
  async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent> {
    self.credentials()?;
    let token = self.access_token().await?;
    let body = json!({
      "intent": "CAPTURE",
      "purchase_units": [{
        "reference_id": request.attempt_id,
        "amount": {
          "currency_code": request.currency,
          "value": cents_to_decimal(request.amount_cents),
        }
      }],
      "application_context": {
        "return_url": request.return_url,
        "cancel_url": request.cancel_url,
      }
    });

    let response = self
      .client
      .post(format!("{}/v2/checkout/orders", self.api_base))
      .bearer_auth(token)
      .json(&body)
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;
    if !response.status().is_success() {
      let err = read_error(response).await;
      return Err(AppError::gateway_unavailable(PROVIDER, err.summary()));
    }
    let order: OrderResponse = response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Unreadable order: {}", e)))?;

    let approve = order
      .links
      .iter()
      .find(|l| l.rel == "approve" || l.rel == "payer-action")
      .map(|l| l.href.clone());
    debug!(paypal_order_id = %order.id, status = %order.status, "PayPal order created.");
    Ok(CreatedIntent {
      provider_ref: order.id,
      redirect_url: approve,
      qr_code: None,
    })
  }

  #[instrument(name = "paypal::capture_intent", skip(self))]
  async fn capture_intent(&self, provider_ref: &str) -> Result<CapturedPayment> {
    let token = self.access_token().await?;
    let response = self
      .client
      .post(format!("{}/v2/checkout/orders/{}/capture", self.api_base, provider_ref))
      .bearer_auth(&token)
      .header("Content-Type", "application/json")
      .body("{}")
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;

    let status = response.status();
    if status.is_server_error() {
      let err = read_error(response).await;
      return Err(AppError::gateway_unavailable(PROVIDER, err.summary()));
    }
    if !status.is_success() {
      let err = read_error(response).await;
      let issue = err.issue().unwrap_or_else(|| format!("HTTP {}", status));
      if issue == ALREADY_CAPTURED {
        // A repeat return after a successful capture: read the settled order instead.
        debug!(paypal_order_id = provider_ref, "Order already captured; fetching it.");
        return captured_payment(self.fetch_order(&token, provider_ref).await?);
      }
      return Err(AppError::not_completed(PROVIDER, issue));
    }

    let order: OrderResponse = response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Unreadable capture: {}", e)))?;
    captured_payment(order)
  }

  #[instrument(name = "paypal::query_intent", skip(self))]
  async fn query_intent(&self, provider_ref: &str) -> Result<RemoteStatus> {
    let token = self.access_token().await?;
    let response = self
      .client
      .get(format!("{}/v2/checkout/orders/{}", self.api_base, provider_ref))
      .bearer_auth(token)
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(RemoteStatus::Pending);
    }
    if !response.status().is_success() {
      let err = read_error(response).await;
      return Err(AppError::gateway_unavailable(PROVIDER, err.summary()));
    }
    let order: OrderResponse = response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Unreadable order: {}", e)))?;
    Ok(match order.status.as_str() {
      "COMPLETED" => RemoteStatus::Paid,
      "VOIDED" => RemoteStatus::Failed,
      _ => RemoteStatus::Pending,
    })
  }

  #[instrument(name = "paypal::refund", skip(self))]
  async fn refund(&self, reference: &str, amount_cents: Option<i64>, currency: &str) -> Result<RefundReceipt> {
    let token = self
      .access_token()
      .await
      .map_err(|e| AppError::refund_failed(PROVIDER, e.to_string()))?;
    let body = match amount_cents {
      Some(amount) => json!({ "amount": { "value": cents_to_decimal(amount), "currency_code": currency } }),
      None => json!({}),
    };
    let response = self
      .client
      .post(format!("{}/v2/payments/captures/{}/refund", self.api_base, reference))
      .bearer_auth(token)
      .json(&body)
      .send()
      .await
      .map_err(|e| AppError::refund_failed(PROVIDER, e.to_string()))?;
    if !response.status().is_success() {
      let err = read_error(response).await;
      return Err(AppError::refund_failed(PROVIDER, err.summary()));
    }
    let refund: RefundResponse = response
      .json()
      .await
      .map_err(|e| AppError::refund_failed(PROVIDER, format!("Unreadable refund: {}", e)))?;
    if refund.status == "FAILED" || refund.status == "CANCELLED" {
      return Err(AppError::refund_failed(PROVIDER, format!("refund {}", refund.status)));
    }
    Ok(RefundReceipt {
      refund_id: refund.id,
      status: refund.status,
    })
  }
}
