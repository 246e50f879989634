// tests/finalize_tests.rs
mod common;

use chrono::Utc;
use common::*;
use futures_util::future::join_all;
use serial_test::serial;
use tally_checkout::errors::AppError;
use tally_checkout::gateway::RemoteStatus;
use tally_checkout::intents::PendingIntent;
use tally_checkout::models::{DeliveryType, LedgerStatus, PaymentMethod, PaymentStatus};
use tally_checkout::pipelines::checkout_pipeline::{self, BeginCheckout};
use tally_checkout::pipelines::confirm;
use tally_checkout::pipelines::contexts::{FinalizeOutcome, LineSource};
use tally_checkout::pipelines::finalize_pipeline::{self, FinalizeRequest};
use tally_checkout::services::delivery::DeliveryPlan;
use tally_checkout::services::orders;

fn snapshot(reference: &str, total_cents: i64) -> PendingIntent {
  PendingIntent {
    provider_ref: reference.to_string(),
    lines: vec![line("Laksa", 400, 2), line("Kopi O", 200, 1)],
    subtotal_cents: 1000,
    delivery_fee_cents: 0,
    benefit_discount_cents: 0,
    promo_code: Some("SAVE10".to_string()),
    promo_discount_cents: 100,
    total_cents,
    delivery: DeliveryPlan::now(),
    order_id: None,
    opened_at: Utc::now(),
  }
}

fn stripe_checkout() -> BeginCheckout {
  BeginCheckout {
    method: PaymentMethod::Stripe,
    delivery_type: DeliveryType::Now,
    scheduled_at: None,
    promo_code: None,
  }
}

#[tokio::test]
#[serial]
async fn test_same_payment_finalized_twice_yields_one_order() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Nasi Lemak", 500, 2).await;

  let request = FinalizeRequest {
    method: PaymentMethod::Paypal,
    payment: captured("PAY-1", Some(1000)),
    account_id: Some(account.account_id),
    snapshot: None,
  };
  let first = finalize_pipeline::finalize(&app.state, request.clone()).await.unwrap();
  let second = finalize_pipeline::finalize(&app.state, request).await.unwrap();

  assert_eq!(first.outcome, FinalizeOutcome::Created);
  assert_eq!(first.line_source, Some(LineSource::LiveCart));
  assert_eq!(first.order.payment_status, PaymentStatus::Paid);
  assert_eq!(first.order.total_amount_cents, 1000);
  assert!(first.order.eta_window_start.is_some());

  assert_eq!(second.outcome, FinalizeOutcome::AlreadyFinalized);
  assert_eq!(second.order.id, first.order.id);
  assert_eq!(app.store.order_count(), 1);

  let ledger = app.stores().ledger.for_order(first.order.id).await.unwrap();
  assert_eq!(ledger.len(), 1);
  assert_eq!(ledger[0].status, LedgerStatus::Paid);
  assert_eq!(ledger[0].capture_id.as_deref(), Some("cap_PAY-1"));
  assert!(app.stores().carts.lines(account.account_id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_confirmations_create_exactly_one_order() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Kaya Toast Set", 450, 2).await;

  let attempts = (0..8).map(|_| {
    let state = app.state.clone();
    let request = FinalizeRequest {
      method: PaymentMethod::Stripe,
      payment: captured("cs_race", Some(900)),
      account_id: Some(account.account_id),
      snapshot: Some(snapshot("cs_race", 900)),
    };
    tokio::spawn(async move { finalize_pipeline::finalize(&state, request).await })
  });
  let results: Vec<_> = join_all(attempts)
    .await
    .into_iter()
    .map(|joined| joined.expect("task panicked").expect("finalize failed"))
    .collect();

  let created = results.iter().filter(|r| r.outcome == FinalizeOutcome::Created).count();
  assert_eq!(created, 1);
  let first_id = results[0].order.id;
  assert!(results.iter().all(|r| r.order.id == first_id));
  assert_eq!(app.store.order_count(), 1);
  assert_eq!(app.stores().ledger.for_order(first_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_snapshot_rebuilds_order_when_cart_is_gone() {
  let app = TestApp::new();
  let account = customer();

  let finalized = finalize_pipeline::finalize(
    &app.state,
    FinalizeRequest {
      method: PaymentMethod::Stripe,
      payment: captured("cs_snap", Some(900)),
      account_id: Some(account.account_id),
      snapshot: Some(snapshot("cs_snap", 900)),
    },
  )
  .await
  .unwrap();

  assert_eq!(finalized.line_source, Some(LineSource::Snapshot));
  assert_eq!(finalized.order.subtotal_cents, 1000);
  assert_eq!(finalized.order.promo_code.as_deref(), Some("SAVE10"));
  assert_eq!(finalized.order.promo_discount_cents, 100);
  assert_eq!(finalized.order.total_amount_cents, 900);
  let lines = app.stores().orders.order_lines(finalized.order.id).await.unwrap();
  assert_eq!(lines.len(), 2);
}

#[tokio::test]
#[serial]
async fn test_foreign_snapshot_is_ignored_in_favour_of_gateway_echo() {
  let app = TestApp::new();
  let account = customer();
  let mut payment = captured("cs_echo", Some(1300));
  payment.echo_lines = vec![line("Laksa", 550, 2)];

  let finalized = finalize_pipeline::finalize(
    &app.state,
    FinalizeRequest {
      method: PaymentMethod::Stripe,
      payment,
      account_id: Some(account.account_id),
      snapshot: Some(snapshot("cs_other", 900)),
    },
  )
  .await
  .unwrap();

  assert_eq!(finalized.line_source, Some(LineSource::GatewayEcho));
  assert_eq!(finalized.order.subtotal_cents, 1100);
  assert_eq!(finalized.order.delivery_fee_cents, 200);
  assert_eq!(finalized.order.total_amount_cents, 1300);
  assert_eq!(finalized.order.promo_code, None);
}

#[tokio::test]
#[serial]
async fn test_payment_with_nothing_to_rebuild_from_fails_without_writing() {
  let app = TestApp::new();
  let account = customer();

  let err = finalize_pipeline::finalize(
    &app.state,
    FinalizeRequest {
      method: PaymentMethod::Paypal,
      payment: captured("PAY-EMPTY", Some(500)),
      account_id: Some(account.account_id),
      snapshot: None,
    },
  )
  .await
  .unwrap_err();

  assert!(matches!(err, AppError::EmptyCart(_)), "unexpected error: {:?}", err);
  assert_eq!(app.store.order_count(), 0);
}

#[tokio::test]
#[serial]
async fn test_ledger_failure_does_not_undo_the_order() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Laksa", 780, 1).await;
  app.store.fail_ledger_appends(true);

  let finalized = finalize_pipeline::finalize(
    &app.state,
    FinalizeRequest {
      method: PaymentMethod::Paypal,
      payment: captured("PAY-NOLEDGER", Some(980)),
      account_id: Some(account.account_id),
      snapshot: None,
    },
  )
  .await
  .unwrap();

  assert_eq!(finalized.outcome, FinalizeOutcome::Created);
  assert_eq!(finalized.order.payment_status, PaymentStatus::Paid);
  assert!(app.stores().ledger.for_order(finalized.order.id).await.unwrap().is_empty());
  assert!(app.stores().carts.lines(account.account_id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_redirect_checkout_promotes_the_pending_order() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Nasi Lemak", 650, 1).await;

  let started = checkout_pipeline::begin_checkout(&app.state, &account, stripe_checkout())
    .await
    .unwrap();
  let order_id = started.order_id.expect("redirect checkout opens an order");
  assert_eq!(started.total_cents, 850);
  let pending = app.stores().orders.get(order_id).await.unwrap().unwrap();
  assert_eq!(pending.payment_status, PaymentStatus::Pending);

  app.stripe.settle(&started.provider_ref, RemoteStatus::Paid);
  let finalized = confirm::confirm_redirect(&app.state, account.account_id, &started.provider_ref)
    .await
    .unwrap();

  assert_eq!(finalized.outcome, FinalizeOutcome::Updated);
  assert_eq!(finalized.order.id, order_id);
  assert_eq!(finalized.line_source, Some(LineSource::Persisted));
  assert_eq!(finalized.order.payment_status, PaymentStatus::Paid);
  assert_eq!(app.store.order_count(), 1);
  assert!(app.state.intents.is_empty());

  let again = confirm::confirm_redirect(&app.state, account.account_id, &started.provider_ref)
    .await
    .unwrap();
  assert_eq!(again.outcome, FinalizeOutcome::AlreadyFinalized);
}

#[tokio::test]
#[serial]
async fn test_late_confirmation_revives_an_expired_order() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Laksa", 780, 2).await;

  let started = checkout_pipeline::begin_checkout(&app.state, &account, stripe_checkout())
    .await
    .unwrap();
  let order_id = started.order_id.unwrap();
  let later = Utc::now() + chrono::Duration::minutes(10);
  let expired = orders::expire_stale(app.stores(), chrono::Duration::minutes(5), later).await.unwrap();
  assert_eq!(expired, 1);
  assert_eq!(
    app.stores().orders.get(order_id).await.unwrap().unwrap().payment_status,
    PaymentStatus::Cancelled
  );

  app.stripe.settle(&started.provider_ref, RemoteStatus::Paid);
  let finalized = confirm::confirm_redirect(&app.state, account.account_id, &started.provider_ref)
    .await
    .unwrap();
  assert_eq!(finalized.outcome, FinalizeOutcome::Updated);
  assert_eq!(finalized.order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
#[serial]
async fn test_unpaid_redirect_is_not_finalized() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Kopi O", 180, 3).await;

  let started = checkout_pipeline::begin_checkout(&app.state, &account, stripe_checkout())
    .await
    .unwrap();
  let err = confirm::confirm_redirect(&app.state, account.account_id, &started.provider_ref)
    .await
    .unwrap_err();

  assert!(matches!(err, AppError::PaymentNotCompleted { .. }), "unexpected error: {:?}", err);
  let order = app.stores().orders.get(started.order_id.unwrap()).await.unwrap().unwrap();
  assert_eq!(order.payment_status, PaymentStatus::Pending);
  assert_eq!(app.state.intents.len(), 1);
}

#[tokio::test]
#[serial]
async fn test_repeat_paypal_return_skips_the_gateway() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Laksa", 780, 2).await;

  let started = checkout_pipeline::begin_checkout(
    &app.state,
    &account,
    BeginCheckout {
      method: PaymentMethod::Paypal,
      delivery_type: DeliveryType::Now,
      scheduled_at: None,
      promo_code: None,
    },
  )
  .await
  .unwrap();
  app.paypal.settle(&started.provider_ref, RemoteStatus::Paid);

  let first = confirm::capture_direct(&app.state, account.account_id, &started.provider_ref)
    .await
    .unwrap();
  assert_eq!(first.outcome, FinalizeOutcome::Created);

  let again = confirm::capture_direct(&app.state, account.account_id, &started.provider_ref)
    .await
    .unwrap();
  assert_eq!(again.outcome, FinalizeOutcome::AlreadyFinalized);
  assert_eq!(again.order.id, first.order.id);
  assert_eq!(app.paypal.capture_calls(), 1);
  assert_eq!(app.store.order_count(), 1);
  assert_eq!(app.stores().ledger.for_order(first.order.id).await.unwrap().len(), 1);
}
