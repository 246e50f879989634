// app/src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::instrument;

use crate::errors::AppError;
use crate::pipelines::webhook_pipeline;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Takes the raw body: the signature covers the exact bytes sent.
#[instrument(name = "handler::stripe_webhook", skip(app_state, req, body), fields(bytes = body.len()))]
pub async fn stripe_webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let signature = req
    .headers()
    .get(SIGNATURE_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string);
  let receipt = webhook_pipeline::handle_webhook(&app_state, body, signature).await?;
  Ok(HttpResponse::Ok().json(json!({
    "received": true,
    "order_id": receipt.order_id,
    "outcome": receipt.outcome,
  })))
}
