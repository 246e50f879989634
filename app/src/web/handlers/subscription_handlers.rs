// app/src/web/handlers/subscription_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::errors::AppError;
use crate::models::Plan;
use crate::services::{subscriptions, wallet};
use crate::state::AppState;
use crate::web::AuthenticatedAccount;

#[derive(Deserialize, Debug)]
pub struct SubscribePayload {
  pub plan: String,
}

#[derive(Deserialize, Debug)]
pub struct CancelPayload {
  /// `true` ends benefits now; otherwise they run to the end of the paid period.
  #[serde(default)]
  pub immediate: bool,
}

#[instrument(name = "handler::current_subscription", skip(app_state, account), fields(account = %account.id()))]
pub async fn current_subscription_handler(
  app_state: web::Data<AppState>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let now = Utc::now();
  let row = subscriptions::current(&app_state.stores, account.id(), now).await?;
  let active = subscriptions::is_active(row.as_ref(), now);
  Ok(HttpResponse::Ok().json(json!({ "subscription": row, "active": active })))
}

#[instrument(name = "handler::subscribe", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn subscribe_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<SubscribePayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let plan: Plan = payload.plan.parse().map_err(AppError::Validation)?;
  let row = subscriptions::subscribe(&app_state.stores, account.id(), plan, Utc::now()).await?;
  Ok(HttpResponse::Created().json(row))
}

#[instrument(name = "handler::cancel_subscription", skip(app_state, account, payload), fields(account = %account.id()))]
pub async fn cancel_subscription_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<CancelPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let now = Utc::now();
  let row = if payload.immediate {
    subscriptions::cancel_immediately(&app_state.stores, account.id(), now).await?
  } else {
    subscriptions::cancel_at_period_end(&app_state.stores, account.id(), now).await?
  };
  Ok(HttpResponse::Ok().json(row))
}

#[instrument(name = "handler::wallet", skip(app_state, account), fields(account = %account.id()))]
pub async fn wallet_handler(
  app_state: web::Data<AppState>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let (balance, history) = wallet::statement(app_state.stores.wallets.as_ref(), account.id()).await?;
  Ok(HttpResponse::Ok().json(json!({ "balance_cents": balance, "history": history })))
}
