// tests/cart_checkout_tests.rs
mod common;

use chrono::{Duration, Utc};
use common::*;
use serial_test::serial;
use tally_checkout::errors::AppError;
use tally_checkout::gateway::{PaymentFlow, RemoteStatus};
use tally_checkout::models::subscription::add_billing_period;
use tally_checkout::models::{DeliveryType, PaymentMethod, PaymentStatus, Plan, PromoCode, SubscriptionStatus};
use tally_checkout::pipelines::checkout_pipeline::{self, BeginCheckout};
use tally_checkout::pipelines::confirm::{self, PollOutcome, PollState};
use tally_checkout::pipelines::{cart_pipeline, contexts::FinalizeOutcome};
use tally_checkout::services::benefits;
use tally_checkout::services::promo::{self, LegacyRule};
use tally_checkout::services::subscriptions;

fn checkout(method: PaymentMethod) -> BeginCheckout {
  BeginCheckout {
    method,
    delivery_type: DeliveryType::Now,
    scheduled_at: None,
    promo_code: None,
  }
}

const RULE: LegacyRule = LegacyRule {
  cap_cents: 600,
  min_spend_cents: 2000,
};

#[tokio::test]
#[serial]
async fn test_adding_to_cart_reserves_stock() {
  let app = TestApp::new();
  let account = customer();
  let product = app.product("Kopi O", 180, 5).await;

  cart_pipeline::add_item(&app.state, account.account_id, product.id, 2).await.unwrap();
  let line = cart_pipeline::add_item(&app.state, account.account_id, product.id, 1).await.unwrap();
  assert_eq!(line.quantity, 3);
  assert_eq!(app.stock_of(product.id).await, 2);

  let err = cart_pipeline::add_item(&app.state, account.account_id, product.id, 3).await.unwrap_err();
  match err {
    AppError::Validation(msg) => assert_eq!(msg, "Insufficient stock"),
    other => panic!("unexpected error: {:?}", other),
  }
  assert_eq!(app.stock_of(product.id).await, 2);

  let err = cart_pipeline::add_item(&app.state, account.account_id, product.id, 0).await.unwrap_err();
  assert!(matches!(err, AppError::Validation(_)));
  let err = cart_pipeline::add_item(&app.state, account.account_id, uuid::Uuid::new_v4(), 1)
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
#[serial]
async fn test_failed_cart_write_releases_the_reservation() {
  let app = TestApp::new();
  let account = customer();
  let product = app.product("Laksa", 780, 4).await;
  app.store.fail_cart_writes(true);

  let err = cart_pipeline::add_item(&app.state, account.account_id, product.id, 3).await.unwrap_err();
  assert!(matches!(err, AppError::Internal(_)), "unexpected error: {:?}", err);
  assert_eq!(app.stock_of(product.id).await, 4);
  assert!(cart_pipeline::view(&app.state, account.account_id).await.unwrap().lines.is_empty());
}

#[tokio::test]
#[serial]
async fn test_quantity_changes_move_stock_both_ways() {
  let app = TestApp::new();
  let account = customer();
  let product = app.product("Nasi Lemak", 650, 10).await;
  cart_pipeline::add_item(&app.state, account.account_id, product.id, 2).await.unwrap();

  cart_pipeline::update_quantity(&app.state, account.account_id, product.id, 5).await.unwrap();
  assert_eq!(app.stock_of(product.id).await, 5);
  cart_pipeline::update_quantity(&app.state, account.account_id, product.id, 1).await.unwrap();
  assert_eq!(app.stock_of(product.id).await, 9);

  app.store.fail_cart_writes(true);
  assert!(cart_pipeline::update_quantity(&app.state, account.account_id, product.id, 4).await.is_err());
  assert_eq!(app.stock_of(product.id).await, 9);
  app.store.fail_cart_writes(false);

  let view = cart_pipeline::view(&app.state, account.account_id).await.unwrap();
  assert_eq!(view.subtotal_cents, 650);

  cart_pipeline::remove_item(&app.state, account.account_id, product.id).await.unwrap();
  assert_eq!(app.stock_of(product.id).await, 10);
  assert!(matches!(
    cart_pipeline::remove_item(&app.state, account.account_id, product.id).await.unwrap_err(),
    AppError::NotFound(_)
  ));
}

#[tokio::test]
#[serial]
async fn test_checkout_rejects_empty_cart_and_bad_input() {
  let app = TestApp::new();
  let account = customer();

  match checkout_pipeline::begin_checkout(&app.state, &account, checkout(PaymentMethod::Paypal))
    .await
    .unwrap_err()
  {
    AppError::Validation(msg) => assert_eq!(msg, "Your cart is empty."),
    other => panic!("unexpected error: {:?}", other),
  }

  app.cart_with(account.account_id, "Laksa", 780, 1).await;
  let mut bad_promo = checkout(PaymentMethod::Paypal);
  bad_promo.promo_code = Some("SAVE10".to_string());
  match checkout_pipeline::begin_checkout(&app.state, &account, bad_promo).await.unwrap_err() {
    AppError::InvalidPromo(msg) => assert_eq!(msg, "Minimum spend $20 required"),
    other => panic!("unexpected error: {:?}", other),
  }

  let mut too_soon = checkout(PaymentMethod::Paypal);
  too_soon.delivery_type = DeliveryType::Scheduled;
  too_soon.scheduled_at = Some((Utc::now() + Duration::minutes(20)).to_rfc3339());
  assert!(matches!(
    checkout_pipeline::begin_checkout(&app.state, &account, too_soon).await.unwrap_err(),
    AppError::InvalidSchedule(_)
  ));

  app.paypal.set_unavailable(true);
  assert!(matches!(
    checkout_pipeline::begin_checkout(&app.state, &account, checkout(PaymentMethod::Paypal))
      .await
      .unwrap_err(),
    AppError::GatewayUnavailable { .. }
  ));
  assert!(app.state.intents.is_empty());
  assert_eq!(app.store.order_count(), 0);
}

#[tokio::test]
#[serial]
async fn test_checkout_prices_with_plan_and_promo() {
  let app = TestApp::new();
  let account = customer();
  subscriptions::subscribe(app.stores(), account.account_id, Plan::Premium, Utc::now())
    .await
    .unwrap();
  app
    .stores()
    .promos
    .upsert(PromoCode {
      code: "WELCOME15".to_string(),
      percent_off: 15.0,
      expires_at: None,
      active: true,
    })
    .await
    .unwrap();
  app.cart_with(account.account_id, "Laksa", 400, 2).await;

  let mut request = checkout(PaymentMethod::Paypal);
  request.promo_code = Some(" welcome15 ".to_string());
  let started = checkout_pipeline::begin_checkout(&app.state, &account, request).await.unwrap();

  // 800 base, fee waived for premium, 150 plan discount, 15% of 800 off.
  assert_eq!(started.benefits.delivery_fee_cents, 0);
  assert_eq!(started.benefits.discount_cents, 150);
  assert_eq!(started.promo.as_ref().unwrap().discount_cents, 120);
  assert_eq!(started.total_cents, 530);
  assert_eq!(started.flow, PaymentFlow::DirectCapture);
  assert_eq!(started.order_id, None);

  let snapshot = app
    .state
    .intents
    .resolve(account.account_id, PaymentMethod::Paypal, &started.provider_ref)
    .unwrap();
  assert_eq!(snapshot.promo_code.as_deref(), Some("WELCOME15"));
  assert_eq!(snapshot.total_cents, 530);

  app.paypal.settle(&started.provider_ref, RemoteStatus::Paid);
  let finalized = confirm::capture_direct(&app.state, account.account_id, &started.provider_ref)
    .await
    .unwrap();
  assert_eq!(finalized.outcome, FinalizeOutcome::Created);
  assert_eq!(finalized.order.total_amount_cents, 530);
  assert_eq!(finalized.order.promo_discount_cents, 120);
  assert_eq!(finalized.order.benefit_discount_cents, 150);
}

#[tokio::test]
#[serial]
async fn test_new_checkout_supersedes_the_previous_intent() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Kopi O", 180, 2).await;

  let first = checkout_pipeline::begin_checkout(&app.state, &account, checkout(PaymentMethod::Paypal))
    .await
    .unwrap();
  let second = checkout_pipeline::begin_checkout(&app.state, &account, checkout(PaymentMethod::Paypal))
    .await
    .unwrap();

  assert_eq!(app.state.intents.len(), 1);
  assert!(app
    .state
    .intents
    .resolve(account.account_id, PaymentMethod::Paypal, &first.provider_ref)
    .is_none());
  assert!(app
    .state
    .intents
    .resolve(account.account_id, PaymentMethod::Paypal, &second.provider_ref)
    .is_some());
  assert!(!app.state.intents.clear(account.account_id, PaymentMethod::Paypal, &first.provider_ref));
  assert_eq!(app.state.intents.len(), 1);
}

#[tokio::test]
#[serial]
async fn test_qr_poll_reports_each_state() {
  let app = TestApp::new();
  let account = customer();
  app.cart_with(account.account_id, "Kaya Toast Set", 550, 2).await;

  let started = checkout_pipeline::begin_checkout(&app.state, &account, checkout(PaymentMethod::NetsQr))
    .await
    .unwrap();
  assert!(started.qr_code.is_some());
  assert_eq!(started.redirect_url, None);

  let pending = confirm::poll_qr(&app.state, account.account_id, &started.provider_ref).await.unwrap();
  assert_eq!(pending.state(), PollState::Pending);
  assert_eq!(app.nets.query_calls(), 2);

  app.nets.settle(&started.provider_ref, RemoteStatus::Paid);
  match confirm::poll_qr(&app.state, account.account_id, &started.provider_ref).await.unwrap() {
    PollOutcome::Paid(finalized) => {
      assert_eq!(finalized.order.payment_status, PaymentStatus::Paid);
      assert_eq!(finalized.order.total_amount_cents, 1100);
    }
    other => panic!("unexpected poll outcome: {:?}", other.state()),
  }

  app.cart_with(account.account_id, "Kopi O", 180, 1).await;
  let retry = checkout_pipeline::begin_checkout(&app.state, &account, checkout(PaymentMethod::NetsQr))
    .await
    .unwrap();
  app.nets.settle(&retry.provider_ref, RemoteStatus::Failed);
  let failed = confirm::poll_qr(&app.state, account.account_id, &retry.provider_ref).await.unwrap();
  assert_eq!(failed.state(), PollState::Failed);
  assert!(app.state.intents.is_empty());
}

#[tokio::test]
#[serial]
async fn test_promo_rules() {
  let app = TestApp::new();
  let promos = app.stores().promos.as_ref();
  let now = Utc::now();

  let legacy = promo::apply(promos, RULE, "save10", 3000, now).await;
  assert!(legacy.applied);
  assert_eq!(legacy.discount_cents, 300);
  assert_eq!(legacy.message, "Promo applied: SAVE10");

  let capped = promo::apply(promos, RULE, "SAVE10", 9000, now).await;
  assert_eq!(capped.discount_cents, 600);

  let unknown = promo::apply(promos, RULE, "FREEFOOD", 3000, now).await;
  assert!(!unknown.applied);
  assert_eq!(unknown.message, "Promo code not recognized");

  app
    .stores()
    .promos
    .upsert(PromoCode {
      code: "OLD50".to_string(),
      percent_off: 50.0,
      expires_at: Some(now - Duration::days(1)),
      active: true,
    })
    .await
    .unwrap();
  let expired = promo::apply(promos, RULE, "OLD50", 3000, now).await;
  assert!(!expired.applied);

  app
    .stores()
    .promos
    .upsert(PromoCode {
      code: "HALF".to_string(),
      percent_off: 150.0,
      expires_at: None,
      active: true,
    })
    .await
    .unwrap();
  let clamped = promo::apply(promos, RULE, "half", 999, now).await;
  assert_eq!(clamped.discount_cents, 999);
  assert_eq!(clamped.percent_off, Some(100.0));

  app
    .stores()
    .promos
    .upsert(PromoCode {
      code: "ZERO".to_string(),
      percent_off: 0.0,
      expires_at: None,
      active: true,
    })
    .await
    .unwrap();
  let zero = promo::apply(promos, RULE, "zero", 3000, now).await;
  assert!(!zero.applied);
  assert_eq!(zero.discount_cents, 0);
  match zero.require_applied().unwrap_err() {
    AppError::InvalidPromo(msg) => assert_eq!(msg, "Promo code gives no discount on this order."),
    other => panic!("unexpected error: {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_benefits_follow_the_cart_and_plan() {
  let app = TestApp::new();
  let account = customer();
  let now = Utc::now();
  let lines = vec![line("Nasi Lemak", 450, 2), line("Teh Tarik", 300, 1)];

  let plain = benefits::compute(app.stores(), account.account_id, &lines, now).await.unwrap();
  assert_eq!(plain.base_cents, 1200);
  assert_eq!(plain.plan, None);
  assert_eq!(plain.delivery_fee_cents, 0);
  assert_eq!(plain.total_cents, 1200);

  subscriptions::subscribe(app.stores(), account.account_id, Plan::Premium, now).await.unwrap();
  let premium = benefits::compute(app.stores(), account.account_id, &lines, now).await.unwrap();
  assert_eq!(premium.plan, Some(Plan::Premium));
  assert_eq!(premium.discount_cents, 150);
  assert_eq!(premium.total_cents, 1050);

  let small = benefits::compute(app.stores(), account.account_id, &[line("Kaya Toast", 400, 1)], now)
    .await
    .unwrap();
  assert_eq!(small.delivery_fee_cents, 200);
  assert_eq!(small.total_cents, 450);
}

#[tokio::test]
#[serial]
async fn test_subscription_lifecycle() {
  let app = TestApp::new();
  let account = customer();
  let now = Utc::now();

  let row = subscriptions::subscribe(app.stores(), account.account_id, Plan::Basic, now).await.unwrap();
  assert!(row.auto_renew);
  assert!(matches!(
    subscriptions::subscribe(app.stores(), account.account_id, Plan::Premium, now).await.unwrap_err(),
    AppError::Conflict(_)
  ));

  // Just past the period end, an auto-renewing row moves on by exactly one period.
  let later = row.end_date + Duration::days(3);
  let renewed = subscriptions::current(app.stores(), account.account_id, later).await.unwrap().unwrap();
  assert_eq!(renewed.status, SubscriptionStatus::Active);
  assert_eq!(renewed.end_date, add_billing_period(row.end_date));
  assert_eq!(
    subscriptions::active_plan(app.stores(), account.account_id, later).await.unwrap(),
    Some(Plan::Basic)
  );

  let cancelled = subscriptions::cancel_at_period_end(app.stores(), account.account_id, later).await.unwrap();
  assert!(cancelled.cancel_at_period_end);
  assert!(!cancelled.auto_renew);

  let after_period = cancelled.end_date + Duration::days(1);
  assert_eq!(
    subscriptions::active_plan(app.stores(), account.account_id, after_period).await.unwrap(),
    None
  );

  let fresh = subscriptions::subscribe(app.stores(), account.account_id, Plan::Premium, after_period)
    .await
    .unwrap();
  assert_eq!(fresh.plan, Plan::Premium);
  let ended = subscriptions::cancel_immediately(app.stores(), account.account_id, after_period)
    .await
    .unwrap();
  assert!(!subscriptions::is_active(Some(&ended), after_period));
  assert!(matches!(
    subscriptions::cancel_immediately(app.stores(), account.account_id, after_period).await.unwrap_err(),
    AppError::NotFound(_)
  ));
}
