// app/src/web/handlers/checkout_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::errors::AppError;
use crate::models::{DeliveryType, LineItem, PaymentMethod};
use crate::pipelines::checkout_pipeline::{self, BeginCheckout};
use crate::pipelines::confirm::{self, PollOutcome};
use crate::pipelines::finalize_pipeline::Finalized;
use crate::services::benefits;
use crate::services::promo::{self, LegacyRule};
use crate::state::AppState;
use crate::web::AuthenticatedAccount;

#[derive(Deserialize, Debug)]
pub struct CheckoutPayload {
  pub method: String,
  #[serde(default = "default_delivery_type")]
  pub delivery_type: DeliveryType,
  pub scheduled_at: Option<String>,
  pub promo_code: Option<String>,
}

fn default_delivery_type() -> DeliveryType {
  DeliveryType::Now
}

#[derive(Deserialize, Debug)]
pub struct QuoteQuery {
  pub promo_code: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ConfirmPayload {
  /// Provider reference: checkout session, QR transaction or approval order id.
  pub reference: String,
}

fn finalized_body(finalized: &Finalized) -> serde_json::Value {
  json!({
    "order_id": finalized.order.id,
    "outcome": finalized.outcome,
    "payment_status": finalized.order.payment_status,
    "total_amount_cents": finalized.order.total_amount_cents,
    "eta_window_start": finalized.order.eta_window_start,
    "eta_window_end": finalized.order.eta_window_end,
  })
}

/// Prices the current cart with plan benefits and an optional promo code.
#[instrument(name = "handler::checkout_quote", skip(app_state, account, query), fields(account = %account.id()))]
pub async fn quote_handler(
  app_state: web::Data<AppState>,
  query: web::Query<QuoteQuery>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let now = Utc::now();
  let lines: Vec<LineItem> = app_state
    .stores
    .carts
    .lines(account.id())
    .await?
    .iter()
    .map(LineItem::from)
    .collect();
  let quote = benefits::compute(&app_state.stores, account.id(), &lines, now).await?;
  let subtotal = quote.base_cents;
  let promo = match query.promo_code.as_deref() {
    Some(code) => {
      let rule = LegacyRule {
        cap_cents: app_state.config.save10_cap_cents,
        min_spend_cents: app_state.config.save10_min_spend_cents,
      };
      Some(promo::apply(app_state.stores.promos.as_ref(), rule, code, subtotal, now).await)
    }
    None => None,
  };
  let promo_discount = promo.as_ref().filter(|p| p.applied).map_or(0, |p| p.discount_cents);
  Ok(HttpResponse::Ok().json(json!({
    "benefits": quote,
    "promo": promo,
    "total_cents": benefits::charge_floor(quote.total_cents - promo_discount),
  })))
}

#[instrument(name = "handler::start_checkout", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn start_checkout_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<CheckoutPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let method: PaymentMethod = payload.method.parse().map_err(AppError::Validation)?;
  let started = checkout_pipeline::begin_checkout(
    &app_state,
    &account.0,
    BeginCheckout {
      method,
      delivery_type: payload.delivery_type,
      scheduled_at: payload.scheduled_at,
      promo_code: payload.promo_code,
    },
  )
  .await?;
  info!(provider_ref = %started.provider_ref, total = started.total_cents, "Checkout started.");
  Ok(HttpResponse::Ok().json(started))
}

#[instrument(name = "handler::confirm_redirect", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn confirm_redirect_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<ConfirmPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let finalized = confirm::confirm_redirect(&app_state, account.id(), payload.reference.trim()).await?;
  Ok(HttpResponse::Ok().json(finalized_body(&finalized)))
}

#[instrument(name = "handler::capture_direct", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn capture_direct_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<ConfirmPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let finalized = confirm::capture_direct(&app_state, account.id(), payload.reference.trim()).await?;
  Ok(HttpResponse::Ok().json(finalized_body(&finalized)))
}

#[instrument(name = "handler::poll_qr", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn poll_qr_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<ConfirmPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let outcome = confirm::poll_qr(&app_state, account.id(), payload.reference.trim()).await?;
  let body = match &outcome {
    PollOutcome::Paid(finalized) => {
      let mut body = finalized_body(finalized);
      body["status"] = json!(outcome.state());
      body
    }
    PollOutcome::Pending | PollOutcome::Failed => json!({ "status": outcome.state() }),
  };
  Ok(HttpResponse::Ok().json(body))
}
