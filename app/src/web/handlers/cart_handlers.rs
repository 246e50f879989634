// app/src/web/handlers/cart_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::pipelines::cart_pipeline;
use crate::state::AppState;
use crate::web::AuthenticatedAccount;

#[derive(Deserialize, Debug)]
pub struct AddToCartPayload {
  pub product_id: Uuid,
  pub quantity: i32,
}

#[derive(Deserialize, Debug)]
pub struct UpdateQuantityPayload {
  pub quantity: i32,
}

#[instrument(name = "handler::view_cart", skip(app_state, account), fields(account = %account.id()))]
pub async fn view_cart_handler(
  app_state: web::Data<AppState>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let cart = cart_pipeline::view(&app_state, account.id()).await?;
  Ok(HttpResponse::Ok().json(cart))
}

#[instrument(
  name = "handler::add_to_cart",
  skip(app_state, payload, account),
  fields(account = %account.id(), product_id = %payload.product_id, quantity = payload.quantity)
)]
pub async fn add_to_cart_handler(
  app_state: web::Data<AppState>,
  payload: web::Json<AddToCartPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let line = cart_pipeline::add_item(&app_state, account.id(), payload.product_id, payload.quantity).await?;
  info!(quantity = line.quantity, "Item added to cart.");
  Ok(HttpResponse::Ok().json(json!({
    "message": "Item added to cart.",
    "line": line,
  })))
}

#[instrument(name = "handler::update_cart_line", skip(app_state, payload, account), fields(account = %account.id()))]
pub async fn update_quantity_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  payload: web::Json<UpdateQuantityPayload>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let line = cart_pipeline::update_quantity(&app_state, account.id(), path.into_inner(), payload.quantity).await?;
  Ok(HttpResponse::Ok().json(json!({ "line": line })))
}

#[instrument(name = "handler::remove_cart_line", skip(app_state, account), fields(account = %account.id()))]
pub async fn remove_item_handler(
  app_state: web::Data<AppState>,
  path: web::Path<Uuid>,
  account: AuthenticatedAccount,
) -> Result<HttpResponse, AppError> {
  let removed = cart_pipeline::remove_item(&app_state, account.id(), path.into_inner()).await?;
  Ok(HttpResponse::Ok().json(json!({
    "message": "Item removed from cart.",
    "line": removed,
  })))
}
