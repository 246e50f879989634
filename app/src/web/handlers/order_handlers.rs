// app/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::AppError;
use crate::services::{delivery, orders, refunds};
use crate::state::AppState;
use crate::web::AuthenticatedAccount;

#[instrument(name = "handler::list_my_orders", skip(app_state, account), fields(account = %account.id()))]
pub async fn list_my_orders_handler(
  app_state: web::Data<AppState>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let orders = orders::list_for_account(
    &app_state.stores,
    account.id(),
    app_state.config.pending_order_timeout(),
    Utc::now(),
  )
  .await?;
  Ok(HttpResponse::Ok().json(orders))
}

#[instrument(name = "handler::get_order", skip(app_state, account), fields(account = %account.id()))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let detail = orders::get_for_viewer(&app_state.stores, path.into_inner(), &account.0).await?;
  Ok(HttpResponse::Ok().json(detail))
}

#[instrument(name = "handler::order_stats", skip(app_state, account), fields(account = %account.id()))]
pub async fn order_stats_handler(
  app_state: web::Data<AppState>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let stats = orders::account_stats(&app_state.stores, account.id()).await?;
  Ok(HttpResponse::Ok().json(stats))
}

#[instrument(name = "handler::admin_list_orders", skip(app_state, account), fields(account = %account.id()))]
pub async fn admin_list_orders_handler(
  app_state: web::Data<AppState>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  refunds::require_admin(&account.0)?;
  let orders = orders::list_all(&app_state.stores, app_state.config.pending_order_timeout(), Utc::now()).await?;
  Ok(HttpResponse::Ok().json(orders))
}

#[instrument(name = "handler::advance_delivery", skip(app_state, account), fields(account = %account.id()))]
pub async fn advance_delivery_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  refunds::require_admin(&account.0)?;
  let order = delivery::advance_delivery(&app_state.stores, path.into_inner()).await?;
  Ok(HttpResponse::Ok().json(order))
}
