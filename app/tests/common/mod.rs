// tests/common/mod.rs
#![allow(dead_code)]

use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use sha2::Sha256;
use std::sync::Arc;
use tally_checkout::config::AppConfig;
use tally_checkout::gateway::mock::MockIntent;
use tally_checkout::gateway::{CapturedPayment, GatewayRegistry, MockGateway, RemoteStatus, WebhookVerifier};
use tally_checkout::models::{AccountIdentity, LineItem, Order, PaymentMethod, Product};
use tally_checkout::pipelines::cart_pipeline;
use tally_checkout::pipelines::finalize_pipeline::{self, FinalizeRequest};
use tally_checkout::state::AppState;
use tally_checkout::store::{MemoryStore, Stores};
use tracing::Level;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

static TRACING: Lazy<()> = Lazy::new(|| {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(Level::DEBUG.to_string()));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING);
}

pub fn test_config() -> AppConfig {
  AppConfig {
    app_base_url: "http://shop.test".to_string(),
    gateway_poll_attempts: 2,
    gateway_poll_backoff_ms: 1,
    ..AppConfig::default()
  }
}

/// State wired to the in-memory store and one scriptable gateway per method.
pub struct TestApp {
  pub state: AppState,
  pub store: Arc<MemoryStore>,
  pub stripe: Arc<MockGateway>,
  pub nets: Arc<MockGateway>,
  pub paypal: Arc<MockGateway>,
}

impl TestApp {
  pub fn new() -> Self {
    Self::with_config(test_config())
  }

  pub fn with_config(config: AppConfig) -> Self {
    setup_tracing();
    let store = Arc::new(MemoryStore::new());
    let stripe = Arc::new(MockGateway::for_method(PaymentMethod::Stripe));
    let nets = Arc::new(MockGateway::for_method(PaymentMethod::NetsQr));
    let paypal = Arc::new(MockGateway::for_method(PaymentMethod::Paypal));

    let mut gateways = GatewayRegistry::new(WebhookVerifier::new(Some(WEBHOOK_SECRET.to_string())));
    gateways.register(stripe.clone());
    gateways.register(nets.clone());
    gateways.register(paypal.clone());

    let state = AppState::new(Stores::from_backend(store.clone()), gateways, config);
    Self {
      state,
      store,
      stripe,
      nets,
      paypal,
    }
  }

  pub fn stores(&self) -> &Stores {
    &self.state.stores
  }

  pub async fn product(&self, name: &str, price_cents: i64, stock: i32) -> Product {
    let product = Product::new(name, price_cents, stock);
    self
      .state
      .stores
      .catalog
      .insert_product(product.clone())
      .await
      .expect("insert product");
    product
  }

  pub async fn stock_of(&self, product_id: Uuid) -> i32 {
    self
      .state
      .stores
      .catalog
      .get_product(product_id)
      .await
      .expect("get product")
      .expect("product exists")
      .stock_quantity
  }

  /// Puts `quantity` of a fresh product into the account's cart.
  pub async fn cart_with(&self, account_id: Uuid, name: &str, price_cents: i64, quantity: i32) -> Product {
    let product = self.product(name, price_cents, 100).await;
    cart_pipeline::add_item(&self.state, account_id, product.id, quantity)
      .await
      .expect("add to cart");
    product
  }

  /// A PAID order for `account`, finalized from a one-line cart.
  pub async fn paid_order(&self, account: &AccountIdentity, method: PaymentMethod, reference: &str, price_cents: i64) -> Order {
    self.cart_with(account.account_id, "Laksa", price_cents, 1).await;
    finalize_pipeline::finalize(
      &self.state,
      FinalizeRequest {
        method,
        payment: captured(reference, Some(price_cents)),
        account_id: Some(account.account_id),
        snapshot: None,
      },
    )
    .await
    .expect("finalize paid order")
    .order
  }
}

pub fn customer() -> AccountIdentity {
  let id = Uuid::new_v4();
  AccountIdentity::customer(id, format!("{}@example.com", id.simple()))
}

pub fn admin() -> AccountIdentity {
  AccountIdentity::admin(Uuid::new_v4())
}

pub fn line(name: &str, unit_price_cents: i64, quantity: i32) -> LineItem {
  LineItem {
    product_id: None,
    product_name: name.to_string(),
    unit_price_cents,
    quantity,
  }
}

pub fn captured(reference: &str, amount_cents: Option<i64>) -> CapturedPayment {
  CapturedPayment {
    provider_ref: reference.to_string(),
    payer_id: Some("payer_1".to_string()),
    payer_email: Some("payer@example.com".to_string()),
    amount_cents,
    currency: Some("SGD".to_string()),
    captured_at: Utc::now(),
    capture_id: Some(format!("cap_{}", reference)),
    echo_lines: Vec::new(),
  }
}

pub fn paid_intent(amount_cents: i64, echo_lines: Vec<LineItem>) -> MockIntent {
  MockIntent {
    amount_cents,
    currency: "SGD".to_string(),
    status: RemoteStatus::Paid,
    payer_email: Some("payer@example.com".to_string()),
    echo_lines,
    captured: false,
  }
}

/// `Stripe-Signature` value for `payload` signed at `timestamp`.
pub fn sign_webhook(payload: &[u8], secret: &str, timestamp: i64) -> String {
  let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
  mac.update(timestamp.to_string().as_bytes());
  mac.update(b".");
  mac.update(payload);
  format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
