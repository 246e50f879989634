// tests/webhook_tests.rs
mod common;

use actix_web::web::Bytes;
use chrono::Utc;
use common::*;
use serde_json::json;
use serial_test::serial;
use tally_checkout::errors::AppError;
use tally_checkout::gateway::WebhookVerifier;
use tally_checkout::models::{DeliveryType, PaymentMethod, PaymentStatus};
use tally_checkout::pipelines::checkout_pipeline::{self, BeginCheckout};
use tally_checkout::pipelines::contexts::FinalizeOutcome;
use tally_checkout::pipelines::webhook_pipeline;
use uuid::Uuid;

fn completed_event(session_id: &str, account_id: Uuid, amount_total: i64) -> Vec<u8> {
  serde_json::to_vec(&json!({
    "id": "evt_1",
    "type": "checkout.session.completed",
    "data": {
      "object": {
        "id": session_id,
        "payment_status": "paid",
        "status": "complete",
        "amount_total": amount_total,
        "currency": "sgd",
        "client_reference_id": account_id.to_string(),
        "customer_details": { "email": "buyer@example.com" },
        "payment_intent": "pi_webhook"
      }
    }
  }))
  .unwrap()
}

fn signed(payload: &[u8]) -> Option<String> {
  Some(sign_webhook(payload, WEBHOOK_SECRET, Utc::now().timestamp()))
}

#[tokio::test]
#[serial]
async fn test_webhook_finalizes_pending_checkout_once() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Laksa", 780, 2).await;
  let started = checkout_pipeline::begin_checkout(
    &app.state,
    &account,
    BeginCheckout {
      method: PaymentMethod::Stripe,
      delivery_type: DeliveryType::Now,
      scheduled_at: None,
      promo_code: None,
    },
  )
  .await
  .unwrap();

  let payload = completed_event(&started.provider_ref, account.account_id, started.total_cents);
  let receipt = webhook_pipeline::handle_webhook(&app.state, Bytes::from(payload.clone()), signed(&payload))
    .await
    .unwrap();
  assert_eq!(receipt.order_id, started.order_id);
  assert_eq!(receipt.outcome, Some(FinalizeOutcome::Updated));

  let order = app.stores().orders.get(started.order_id.unwrap()).await.unwrap().unwrap();
  assert_eq!(order.payment_status, PaymentStatus::Paid);
  assert_eq!(order.payer_email.as_deref(), Some("buyer@example.com"));
  let ledger = app.stores().ledger.for_order(order.id).await.unwrap();
  assert_eq!(ledger[0].capture_id.as_deref(), Some("pi_webhook"));

  // Provider retries deliver the same event again.
  let replay = webhook_pipeline::handle_webhook(&app.state, Bytes::from(payload.clone()), signed(&payload))
    .await
    .unwrap();
  assert_eq!(replay.outcome, Some(FinalizeOutcome::AlreadyFinalized));
  assert_eq!(app.store.order_count(), 1);
}

#[tokio::test]
#[serial]
async fn test_webhook_without_pending_order_builds_from_cart() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Nasi Lemak", 650, 2).await;

  let payload = completed_event("cs_webhook_only", account.account_id, 1300);
  let receipt = webhook_pipeline::handle_webhook(&app.state, Bytes::from(payload.clone()), signed(&payload))
    .await
    .unwrap();

  assert_eq!(receipt.outcome, Some(FinalizeOutcome::Created));
  let order = app.stores().orders.get(receipt.order_id.unwrap()).await.unwrap().unwrap();
  assert_eq!(order.account_id, account.account_id);
  assert_eq!(order.total_amount_cents, 1300);
}

#[tokio::test]
#[serial]
async fn test_webhook_signature_is_enforced() {
  let app = TestApp::new();
  let payload = completed_event("cs_forged", Uuid::new_v4(), 1000);

  match webhook_pipeline::handle_webhook(&app.state, Bytes::from(payload.clone()), None)
    .await
    .unwrap_err()
  {
    AppError::Auth(msg) => assert_eq!(msg, "Webhook signature verification failed: Missing signature."),
    other => panic!("unexpected error: {:?}", other),
  }

  let forged = Some(sign_webhook(&payload, "whsec_wrong", Utc::now().timestamp()));
  assert!(matches!(
    webhook_pipeline::handle_webhook(&app.state, Bytes::from(payload.clone()), forged)
      .await
      .unwrap_err(),
    AppError::Auth(_)
  ));

  let stale = Some(sign_webhook(&payload, WEBHOOK_SECRET, Utc::now().timestamp() - 3600));
  assert!(matches!(
    webhook_pipeline::handle_webhook(&app.state, Bytes::from(payload), stale)
      .await
      .unwrap_err(),
    AppError::Auth(_)
  ));
  assert_eq!(app.store.order_count(), 0);
}

#[tokio::test]
#[serial]
async fn test_unhandled_events_are_acknowledged() {
  let app = TestApp::new();
  let payload = serde_json::to_vec(&json!({
    "id": "evt_2",
    "type": "payment_intent.created",
    "data": { "object": { "id": "pi_1" } }
  }))
  .unwrap();

  let receipt = webhook_pipeline::handle_webhook(&app.state, Bytes::from(payload.clone()), signed(&payload))
    .await
    .unwrap();
  assert_eq!(receipt.order_id, None);
  assert_eq!(receipt.outcome, None);
}

#[test]
fn test_verifier_accepts_any_matching_v1_signature() {
  let verifier = WebhookVerifier::new(Some(WEBHOOK_SECRET.to_string()));
  let payload = br#"{"type":"ping"}"#;
  let now = 1_700_000_000;
  let good = sign_webhook(payload, WEBHOOK_SECRET, now);
  let v1 = good.split(",v1=").nth(1).unwrap();
  let header = format!("t={},v1={},v1={}", now, "00".repeat(32), v1);

  assert!(verifier.verify(payload, &header, now + 10).is_ok());
  assert!(verifier.verify(payload, "v1=abc", now).is_err());
  assert!(matches!(
    WebhookVerifier::new(None).verify(payload, &good, now).unwrap_err(),
    AppError::GatewayUnavailable { .. }
  ));
}
