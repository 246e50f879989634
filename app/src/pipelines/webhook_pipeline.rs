// app/src/pipelines/webhook_pipeline.rs

use actix_web::web::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tallyflow::{ContextData, Saga, SagaRegistry, StepControl};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::gateway::{WebhookEvent, WebhookVerifier};
use crate::models::PaymentMethod;
use crate::pipelines::contexts::{FinalizeOutcome, WebhookCtxData};
use crate::pipelines::finalize_pipeline::{finalize, FinalizeRequest};
use crate::state::AppState;

pub fn register_webhook_saga(registry: &Arc<SagaRegistry<AppError>>) {
  let mut s = Saga::<WebhookCtxData, AppError>::new(&[
    ("verify_webhook_signature", false, None),
    ("parse_webhook_payload", false, None),
    ("finalize_payment", false, None),
  ]);

  s.on_step("verify_webhook_signature", |ctx: ContextData<WebhookCtxData>| {
    Box::pin(async move {
      let guard = ctx.read();
      let header = guard.signature_header.as_deref().ok_or_else(|| {
        warn!("Webhook rejected: signature header missing.");
        AppError::Auth("Webhook signature verification failed: Missing signature.".to_string())
      })?;
      guard
        .app_state
        .gateways
        .webhook_verifier()
        .verify(&guard.raw_payload, header, guard.received_at)?;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("parse_webhook_payload", |ctx: ContextData<WebhookCtxData>| {
    Box::pin(async move {
      let event = WebhookVerifier::parse_event(&ctx.read().raw_payload)?;
      let control = match &event {
        WebhookEvent::Ignored(kind) => {
          info!(event = %kind, "Webhook event acknowledged without action.");
          StepControl::Stop
        }
        WebhookEvent::CheckoutCompleted { payment, .. } => {
          info!(reference = %payment.provider_ref, "Checkout completion received.");
          StepControl::Continue
        }
      };
      ctx.write().event = Some(event);
      Ok::<_, AppError>(control)
    })
  });

  s.on_step("finalize_payment", |ctx: ContextData<WebhookCtxData>| {
    Box::pin(async move {
      let (state, payment, account_id) = {
        let guard = ctx.read();
        match &guard.event {
          Some(WebhookEvent::CheckoutCompleted { payment, account_id }) => {
            (guard.app_state.clone(), payment.clone(), *account_id)
          }
          _ => return Ok(StepControl::Stop),
        }
      };
      let snapshot = account_id.and_then(|id| state.intents.resolve(id, PaymentMethod::Stripe, &payment.provider_ref));
      let finalized = finalize(
        &state,
        FinalizeRequest {
          method: PaymentMethod::Stripe,
          payment,
          account_id,
          snapshot,
        },
      )
      .await?;
      let mut guard = ctx.write();
      guard.finalized_order_id = Some(finalized.order.id);
      guard.outcome = Some(finalized.outcome);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register_saga(s);
  info!("Webhook saga registered.");
}

/// What the webhook did, for the HTTP acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookReceipt {
  pub order_id: Option<Uuid>,
  pub outcome: Option<FinalizeOutcome>,
}

#[instrument(name = "webhook::handle", skip(state, payload, signature_header), fields(bytes = payload.len()))]
pub async fn handle_webhook(state: &AppState, payload: Bytes, signature_header: Option<String>) -> Result<WebhookReceipt> {
  let ctx = ContextData::new(WebhookCtxData {
    app_state: state.clone(),
    raw_payload: payload,
    signature_header,
    received_at: Utc::now().timestamp(),
    event: None,
    finalized_order_id: None,
    outcome: None,
  });
  state.sagas.run(ctx.clone()).await?;
  let guard = ctx.read();
  Ok(WebhookReceipt {
    order_id: guard.finalized_order_id,
    outcome: guard.outcome,
  })
}
