// app/src/gateway/mock.rs

//! Scriptable in-process gateway. Intents start pending and move only when a
//! test (or a local demo) settles them.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{CapturedPayment, CreatedIntent, IntentRequest, PaymentFlow, PaymentGateway, RefundReceipt, RemoteStatus};
use crate::errors::{AppError, Result};
use crate::models::{LineItem, PaymentMethod};

#[derive(Debug, Clone)]
pub struct MockIntent {
  pub amount_cents: i64,
  pub currency: String,
  pub status: RemoteStatus,
  pub payer_email: Option<String>,
  pub echo_lines: Vec<LineItem>,
  /// Direct-capture providers refuse a second capture of the same order.
  pub captured: bool,
}

pub struct MockGateway {
  method: PaymentMethod,
  flow: PaymentFlow,
  intents: Mutex<HashMap<String, MockIntent>>,
  unavailable: AtomicBool,
  refund_failure: Mutex<Option<String>>,
  refund_calls: AtomicUsize,
  query_calls: AtomicUsize,
  capture_calls: AtomicUsize,
  latency: Duration,
}

impl MockGateway {
  pub fn new(method: PaymentMethod, flow: PaymentFlow) -> Self {
    Self {
      method,
      flow,
      intents: Mutex::new(HashMap::new()),
      unavailable: AtomicBool::new(false),
      refund_failure: Mutex::new(None),
      refund_calls: AtomicUsize::new(0),
      query_calls: AtomicUsize::new(0),
      capture_calls: AtomicUsize::new(0),
      latency: Duration::ZERO,
    }
  }

  /// Simulated network latency applied to create and capture.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Mirrors the live adapter's flow for `method`.
  pub fn for_method(method: PaymentMethod) -> Self {
    let flow = match method {
      PaymentMethod::Stripe => PaymentFlow::RedirectCheckout,
      PaymentMethod::NetsQr => PaymentFlow::QrPoll,
      PaymentMethod::Paypal => PaymentFlow::DirectCapture,
    };
    Self::new(method, flow)
  }

  /// Behave as if credentials were missing.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  pub fn fail_refunds_with(&self, reason: Option<&str>) {
    *self.refund_failure.lock() = reason.map(str::to_string);
  }

  /// Registers an intent created outside `create_intent`, e.g. a webhook-only payment.
  pub fn seed_intent(&self, provider_ref: &str, intent: MockIntent) {
    self.intents.lock().insert(provider_ref.to_string(), intent);
  }

  pub fn settle(&self, provider_ref: &str, status: RemoteStatus) {
    if let Some(intent) = self.intents.lock().get_mut(provider_ref) {
      intent.status = status;
    }
  }

  pub fn refund_calls(&self) -> usize {
    self.refund_calls.load(Ordering::SeqCst)
  }

  pub fn query_calls(&self) -> usize {
    self.query_calls.load(Ordering::SeqCst)
  }

  pub fn capture_calls(&self) -> usize {
    self.capture_calls.load(Ordering::SeqCst)
  }

  fn check_available(&self) -> Result<()> {
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(AppError::gateway_unavailable(self.method.as_str(), "mock gateway disabled"));
    }
    Ok(())
  }
}

#[async_trait]
impl PaymentGateway for MockGateway {
  fn method(&self) -> PaymentMethod {
    self.method
  }

  fn flow(&self) -> PaymentFlow {
    self.flow
  }

  #[instrument(skip(self, request), fields(provider = %self.method, amount = request.amount_cents))]
  async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent> {
    self.check_available()?;
    if request.amount_cents <= 0 {
      return Err(AppError::Validation("Amount must be greater than zero".to_string()));
    }
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    let provider_ref = format!("mock_{}_{}", self.method.as_str().to_ascii_lowercase(), Uuid::new_v4().simple());
    self.intents.lock().insert(
      provider_ref.clone(),
      MockIntent {
        amount_cents: request.amount_cents,
        currency: request.currency.clone(),
        status: RemoteStatus::Pending,
        payer_email: request.customer_email.clone(),
        echo_lines: request.lines.clone(),
        captured: false,
      },
    );
    info!(provider = %self.method, %provider_ref, "Mock intent created.");
    Ok(CreatedIntent {
      redirect_url: match self.flow {
        PaymentFlow::QrPoll => None,
        _ => Some(format!("https://mock.invalid/pay/{}", provider_ref)),
      },
      qr_code: match self.flow {
        PaymentFlow::QrPoll => Some(format!("QR:{}", provider_ref)),
        _ => None,
      },
      provider_ref,
    })
  }

  async fn capture_intent(&self, provider_ref: &str) -> Result<CapturedPayment> {
    self.check_available()?;
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    self.capture_calls.fetch_add(1, Ordering::SeqCst);
    let intent = {
      let mut intents = self.intents.lock();
      let intent = intents
        .get_mut(provider_ref)
        .ok_or_else(|| AppError::not_completed(self.method.as_str(), "not_found"))?;
      if intent.status != RemoteStatus::Paid {
        return Err(AppError::not_completed(
          self.method.as_str(),
          format!("{:?}", intent.status).to_ascii_lowercase(),
        ));
      }
      if self.flow == PaymentFlow::DirectCapture {
        if intent.captured {
          return Err(AppError::not_completed(self.method.as_str(), "ORDER_ALREADY_CAPTURED"));
        }
        intent.captured = true;
      }
      intent.clone()
    };
    Ok(CapturedPayment {
      provider_ref: provider_ref.to_string(),
      payer_id: Some(format!("payer_{}", provider_ref)),
      payer_email: intent.payer_email,
      amount_cents: Some(intent.amount_cents),
      currency: Some(intent.currency),
      captured_at: Utc::now(),
      capture_id: Some(format!("cap_{}", provider_ref)),
      echo_lines: intent.echo_lines,
    })
  }

  async fn query_intent(&self, provider_ref: &str) -> Result<RemoteStatus> {
    self.check_available()?;
    self.query_calls.fetch_add(1, Ordering::SeqCst);
    Ok(
      self
        .intents
        .lock()
        .get(provider_ref)
        .map(|i| i.status)
        .unwrap_or(RemoteStatus::Pending),
    )
  }

  async fn refund(&self, reference: &str, amount_cents: Option<i64>, _currency: &str) -> Result<RefundReceipt> {
    self.refund_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(reason) = self.refund_failure.lock().clone() {
      return Err(AppError::refund_failed(self.method.as_str(), reason));
    }
    info!(provider = %self.method, reference, ?amount_cents, "Mock refund issued.");
    Ok(RefundReceipt {
      refund_id: format!("re_{}", Uuid::new_v4().simple()),
      status: "COMPLETED".to_string(),
    })
  }
}
