// app/src/web/handlers/refund_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::AppError;
use crate::pipelines::refund_pipeline::{self, ApproveRefund};
use crate::services::refunds::{self, RefundMode, RefundScope};
use crate::state::AppState;
use crate::web::AuthenticatedAccount;

#[derive(Deserialize, Debug)]
pub struct RefundReasonPayload {
  pub reason: String,
}

#[derive(Deserialize, Debug)]
pub struct ApproveRefundPayload {
  #[serde(default = "default_mode")]
  pub mode: RefundMode,
  #[serde(default = "default_scope")]
  pub scope: RefundScope,
  pub amount_cents: Option<i64>,
  pub note: Option<String>,
}

fn default_mode() -> RefundMode {
  RefundMode::Live
}

fn default_scope() -> RefundScope {
  RefundScope::Full
}

#[instrument(name = "handler::request_refund", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn request_refund_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  payload: web::Json<RefundReasonPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let order = refunds::request(
    &app_state.stores,
    path.into_inner(),
    &account.0,
    &payload.reason,
    app_state.config.refund_window(),
    Utc::now(),
  )
  .await?;
  Ok(HttpResponse::Accepted().json(order))
}

#[instrument(name = "handler::approve_refund", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn approve_refund_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  payload: web::Json<ApproveRefundPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  let approved = refund_pipeline::approve(
    &app_state,
    path.into_inner(),
    &account.0,
    ApproveRefund {
      mode: payload.mode,
      scope: payload.scope,
      amount_cents: payload.amount_cents,
      note: payload.note,
    },
  )
  .await?;
  Ok(HttpResponse::Ok().json(approved))
}

#[instrument(name = "handler::reject_refund", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn reject_refund_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  payload: web::Json<RefundReasonPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let order = refunds::reject(&app_state.stores, path.into_inner(), &account.0, &payload.reason, Utc::now()).await?;
  Ok(HttpResponse::Ok().json(order))
}
