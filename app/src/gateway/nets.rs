// app/src/gateway/nets.rs

//! NETS QR: request a QR code, then poll the transaction until it settles.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{CapturedPayment, CreatedIntent, IntentRequest, PaymentFlow, PaymentGateway, RefundReceipt, RemoteStatus};
use crate::config::NetsConfig;
use crate::errors::{AppError, Result};
use crate::models::PaymentMethod;

const PROVIDER: &str = "NETS_QR";

const TXN_STATUS_PAID: i64 = 2;
const TXN_STATUS_FAILED: i64 = 3;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
  status: Option<String>,
  message: Option<String>,
  result: Option<EnvelopeResult<T>>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResult<T> {
  data: Option<T>,
  message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QrData {
  qr_code: Option<String>,
  txn_retrieval_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
  #[serde(alias = "txnStatus")]
  txn_status: Option<serde_json::Value>,
}

impl<T> Envelope<T> {
  fn is_success(&self) -> bool {
    self.status.as_deref() == Some("success")
  }

  fn failure_message(&self, fallback: &str) -> String {
    self
      .result
      .as_ref()
      .and_then(|r| r.message.clone())
      .or_else(|| self.message.clone())
      .unwrap_or_else(|| fallback.to_string())
  }
}

pub struct NetsGateway {
  client: Client,
  api_key: Option<String>,
  project_id: Option<String>,
  base_url: String,
}

impl NetsGateway {
  pub fn new(client: Client, config: &NetsConfig) -> Self {
    Self {
      client,
      api_key: config.api_key.clone(),
      project_id: config.project_id.clone(),
      base_url: config.base_url.trim_end_matches('/').to_string(),
    }
  }

  fn credentials(&self) -> Result<(&str, &str)> {
    match (self.api_key.as_deref(), self.project_id.as_deref()) {
      (Some(key), Some(project)) => Ok((key, project)),
      (key, project) => {
        let mut missing = Vec::new();
        if key.is_none() {
          missing.push("NETS_API_KEY");
        }
        if project.is_none() {
          missing.push("NETS_PROJECT_ID");
        }
        Err(AppError::gateway_unavailable(
          PROVIDER,
          format!("NETS credentials missing: {}", missing.join(", ")),
        ))
      }
    }
  }

  fn post(&self, path: &str, key: &str, project: &str) -> reqwest::RequestBuilder {
    self
      .client
      .post(format!("{}{}", self.base_url, path))
      .header("api-key", key)
      .header("project-id", project)
      .header("Accept", "application/json")
  }
}

fn parse_txn_status(value: Option<&serde_json::Value>) -> Option<i64> {
  match value? {
    serde_json::Value::Number(n) => n.as_i64(),
    serde_json::Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

#[async_trait]
impl PaymentGateway for NetsGateway {
  fn method(&self) -> PaymentMethod {
    PaymentMethod::NetsQr
  }

  fn flow(&self) -> PaymentFlow {
    PaymentFlow::QrPoll
  }

  #[instrument(name = "nets::create_intent", skip_all, fields(attempt_id = %request.attempt_id, amount = request.amount_cents))]
  async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent> {
    let (key, project) = self.credentials()?;
    if request.amount_cents <= 0 {
      return Err(AppError::Validation("Invalid amount for NETS QR.".to_string()));
    }

    let body = json!({
      "txn_id": request.attempt_id,
      "amount": {
        "value": request.amount_cents as f64 / 100.0,
        "currency": request.currency,
      },
      "reference": request.attempt_id,
    });

    let response = self
      .post("/qr/request", key, project)
      .json(&body)
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;

    let status = response.status();
    let envelope: Envelope<QrData> = response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Non-JSON QR response (HTTP {}): {}", status, e)))?;
    if !status.is_success() || !envelope.is_success() {
      return Err(AppError::gateway_unavailable(
        PROVIDER,
        envelope.failure_message("NETS QR request failed"),
      ));
    }

    let data = envelope.result.and_then(|r| r.data);
    let (Some(qr_code), Some(txn_ref)) = (
      data.as_ref().and_then(|d| d.qr_code.clone()),
      data.as_ref().and_then(|d| d.txn_retrieval_ref.clone()),
    ) else {
      return Err(AppError::gateway_unavailable(
        PROVIDER,
        "NETS QR response missing qr_code / txn_retrieval_ref",
      ));
    };

    debug!(txn_retrieval_ref = %txn_ref, "NETS QR issued.");
    Ok(CreatedIntent {
      provider_ref: txn_ref,
      redirect_url: None,
      qr_code: Some(qr_code),
    })
  }

  async fn capture_intent(&self, provider_ref: &str) -> Result<CapturedPayment> {
    match self.query_intent(provider_ref).await? {
      RemoteStatus::Paid => Ok(CapturedPayment {
        provider_ref: provider_ref.to_string(),
        payer_id: None,
        payer_email: None,
        amount_cents: None,
        currency: None,
        captured_at: Utc::now(),
        capture_id: None,
        echo_lines: Vec::new(),
      }),
      RemoteStatus::Pending => Err(AppError::not_completed(PROVIDER, "pending")),
      RemoteStatus::Failed => Err(AppError::not_completed(PROVIDER, "failed")),
    }
  }

  #[instrument(name = "nets::query_intent", skip(self))]
  async fn query_intent(&self, provider_ref: &str) -> Result<RemoteStatus> {
    let (key, project) = self.credentials()?;
    let body = json!({
      "txn_retrieval_ref": provider_ref,
      "frontend_timeout_status": 1,
    });

    let response = self
      .post("/api/v1/common/payments/nets-qr/query", key, project)
      .json(&body)
      .send()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, e.to_string()))?;

    // The sandbox answers 404 while the transaction is still being set up.
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(RemoteStatus::Pending);
    }
    let status = response.status();
    let envelope: Envelope<QueryData> = response
      .json()
      .await
      .map_err(|e| AppError::gateway_unavailable(PROVIDER, format!("Non-JSON query response (HTTP {}): {}", status, e)))?;
    if !status.is_success() || !envelope.is_success() {
      return Err(AppError::gateway_unavailable(
        PROVIDER,
        envelope.failure_message("NETS query failed"),
      ));
    }

    let txn_status = envelope
      .result
      .and_then(|r| r.data)
      .and_then(|d| parse_txn_status(d.txn_status.as_ref()));
    Ok(match txn_status {
      Some(TXN_STATUS_PAID) => RemoteStatus::Paid,
      Some(TXN_STATUS_FAILED) => RemoteStatus::Failed,
      _ => RemoteStatus::Pending,
    })
  }

  async fn refund(&self, _reference: &str, _amount_cents: Option<i64>, _currency: &str) -> Result<RefundReceipt> {
    Err(AppError::refund_failed(
      PROVIDER,
      "QR payments cannot be refunded through the gateway",
    ))
  }
}
