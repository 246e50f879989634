// app/src/pipelines/checkout_pipeline.rs

//! Opening a payment attempt: validate delivery, price the cart, create the
//! provider intent and remember what was being bought.
//!
//! For redirect checkout the PENDING order is written here, keyed by the
//! provider reference, so a webhook arriving with no session context can still
//! finalize it. The other flows create their order on confirmation.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tallyflow::{ContextData, Saga, SagaOutcome, SagaRegistry, StepControl};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::gateway::{IntentRequest, PaymentFlow};
use crate::intents::PendingIntent;
use crate::models::{items_total_cents, AccountIdentity, DeliveryType, LineItem, NewOrder, PaymentMethod, PaymentStatus};
use crate::pipelines::contexts::CheckoutCtxData;
use crate::services::benefits::{self, BenefitQuote};
use crate::services::delivery::{self, DeliveryPlan};
use crate::services::promo::{self, LegacyRule, PromoOutcome};
use crate::state::AppState;

fn is_not_redirect(ctx: ContextData<CheckoutCtxData>) -> bool {
  ctx.read().flow != Some(PaymentFlow::RedirectCheckout)
}

pub fn register_checkout_saga(registry: &Arc<SagaRegistry<AppError>>) {
  let mut s = Saga::<CheckoutCtxData, AppError>::new(&[
    ("validate_delivery", false, None),
    ("load_cart", false, None),
    ("price_order", false, None),
    ("create_intent", false, None),
    ("open_pending_order", false, Some(Arc::new(is_not_redirect))),
    ("record_pending_intent", false, None),
  ]);

  s.on_step("validate_delivery", |ctx: ContextData<CheckoutCtxData>| {
    Box::pin(async move {
      let plan = {
        let guard = ctx.read();
        delivery::plan_from_request(guard.delivery_type, guard.scheduled_at_raw.as_deref(), guard.now)?
      };
      ctx.write().delivery = Some(plan);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("load_cart", |ctx: ContextData<CheckoutCtxData>| {
    Box::pin(async move {
      let (stores, account_id) = {
        let guard = ctx.read();
        (guard.app_state.stores.clone(), guard.account.account_id)
      };
      let lines: Vec<LineItem> = stores.carts.lines(account_id).await?.iter().map(LineItem::from).collect();
      if lines.is_empty() {
        return Err(AppError::Validation("Your cart is empty.".to_string()));
      }
      ctx.write().lines = lines;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("price_order", |ctx: ContextData<CheckoutCtxData>| {
    Box::pin(async move {
      let (stores, config, account_id, code, lines, now) = {
        let guard = ctx.read();
        (
          guard.app_state.stores.clone(),
          guard.app_state.config.clone(),
          guard.account.account_id,
          guard.promo_code.clone(),
          guard.lines.clone(),
          guard.now,
        )
      };
      let quote = benefits::compute(&stores, account_id, &lines, now).await?;
      let subtotal = quote.base_cents;
      let promo = match code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => {
          let rule = LegacyRule {
            cap_cents: config.save10_cap_cents,
            min_spend_cents: config.save10_min_spend_cents,
          };
          Some(promo::apply(stores.promos.as_ref(), rule, code, subtotal, now).await.require_applied()?)
        }
        None => None,
      };
      let promo_discount = promo.as_ref().map_or(0, |p| p.discount_cents);
      let total = benefits::charge_floor(quote.total_cents - promo_discount);

      let mut guard = ctx.write();
      guard.benefits = Some(quote);
      guard.promo = promo;
      guard.total_cents = total;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("create_intent", |ctx: ContextData<CheckoutCtxData>| {
    Box::pin(async move {
      let (gateway, request) = {
        let guard = ctx.read();
        let gateway = guard.app_state.gateways.get(guard.method)?;
        let base_url = guard.app_state.config.app_base_url.trim_end_matches('/').to_string();
        let request = IntentRequest {
          attempt_id: guard.attempt_id.clone(),
          account_id: guard.account.account_id,
          customer_email: guard.account.email.clone(),
          amount_cents: guard.total_cents,
          currency: guard.app_state.config.currency.clone(),
          lines: guard.lines.clone(),
          delivery_fee_cents: guard.benefits.map_or(0, |b| b.delivery_fee_cents),
          return_url: format!("{}/checkout/{}/return", base_url, guard.method.as_str().to_ascii_lowercase()),
          cancel_url: format!("{}/cart", base_url),
        };
        (gateway, request)
      };
      let created = gateway.create_intent(&request).await?;
      info!(provider = %gateway.method(), provider_ref = %created.provider_ref, "Payment intent created.");
      let mut guard = ctx.write();
      guard.flow = Some(gateway.flow());
      guard.created = Some(created);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("open_pending_order", |ctx: ContextData<CheckoutCtxData>| {
    Box::pin(async move {
      let (stores, new_order, lines) = {
        let guard = ctx.read();
        let created = guard
          .created
          .as_ref()
          .ok_or_else(|| AppError::Internal("No intent to attach the order to.".to_string()))?;
        (
          guard.app_state.stores.clone(),
          pending_order(&guard, created.provider_ref.clone()),
          guard.lines.clone(),
        )
      };
      let order = stores.orders.insert_or_fetch(new_order, lines).await?.into_order();
      info!(order_id = %order.id, "Pending order opened.");
      ctx.write().pending_order_id = Some(order.id);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("record_pending_intent", |ctx: ContextData<CheckoutCtxData>| {
    Box::pin(async move {
      let guard = ctx.read();
      let created = guard
        .created
        .as_ref()
        .ok_or_else(|| AppError::Internal("No intent to record.".to_string()))?;
      let quote = guard.benefits.unwrap_or_else(|| benefits::quote(items_total_cents(&guard.lines), None));
      let intent = PendingIntent {
        provider_ref: created.provider_ref.clone(),
        lines: guard.lines.clone(),
        subtotal_cents: quote.base_cents,
        delivery_fee_cents: quote.delivery_fee_cents,
        benefit_discount_cents: quote.discount_cents,
        promo_code: guard.promo.as_ref().and_then(|p| p.code.clone()),
        promo_discount_cents: guard.promo.as_ref().map_or(0, |p| p.discount_cents),
        total_cents: guard.total_cents,
        delivery: guard.delivery.unwrap_or_else(DeliveryPlan::now),
        order_id: guard.pending_order_id,
        opened_at: guard.now,
      };
      guard.app_state.intents.open(guard.account.account_id, guard.method, intent);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register_saga(s);
  info!("Checkout saga registered.");
}

fn pending_order(ctx: &CheckoutCtxData, provider_ref: String) -> NewOrder {
  let quote = ctx.benefits.unwrap_or_else(|| benefits::quote(items_total_cents(&ctx.lines), None));
  let plan = ctx.delivery.unwrap_or_else(DeliveryPlan::now);
  NewOrder {
    id: Uuid::new_v4(),
    account_id: ctx.account.account_id,
    subtotal_cents: quote.base_cents,
    delivery_fee_cents: quote.delivery_fee_cents,
    benefit_discount_cents: quote.discount_cents,
    promo_code: ctx.promo.as_ref().and_then(|p| p.code.clone()),
    promo_discount_cents: ctx.promo.as_ref().map_or(0, |p| p.discount_cents),
    total_amount_cents: ctx.total_cents,
    currency: ctx.app_state.config.currency.clone(),
    payment_method: ctx.method,
    payment_status: PaymentStatus::Pending,
    payment_reference: provider_ref,
    payer_email: ctx.account.email.clone(),
    paid_at: None,
    delivery_type: plan.delivery_type,
    scheduled_at: plan.scheduled_at,
    eta_window_start: None,
    eta_window_end: None,
    created_at: ctx.now,
  }
}

#[derive(Debug, Clone)]
pub struct BeginCheckout {
  pub method: PaymentMethod,
  pub delivery_type: DeliveryType,
  pub scheduled_at: Option<String>,
  pub promo_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
  pub method: PaymentMethod,
  pub flow: PaymentFlow,
  pub provider_ref: String,
  pub redirect_url: Option<String>,
  pub qr_code: Option<String>,
  pub total_cents: i64,
  pub benefits: BenefitQuote,
  pub promo: Option<PromoOutcome>,
  pub order_id: Option<Uuid>,
}

#[instrument(name = "checkout::begin", skip(state, account, request), fields(account = %account.account_id, method = %request.method))]
pub async fn begin_checkout(state: &AppState, account: &AccountIdentity, request: BeginCheckout) -> Result<CheckoutStarted> {
  let ctx = ContextData::new(CheckoutCtxData {
    app_state: state.clone(),
    account: account.clone(),
    method: request.method,
    delivery_type: request.delivery_type,
    scheduled_at_raw: request.scheduled_at,
    promo_code: request.promo_code,
    now: Utc::now(),
    attempt_id: Uuid::new_v4().simple().to_string(),
    delivery: None,
    lines: Vec::new(),
    benefits: None,
    promo: None,
    total_cents: 0,
    flow: None,
    created: None,
    pending_order_id: None,
  });
  if state.sagas.run(ctx.clone()).await? == SagaOutcome::Stopped {
    return Err(AppError::SagaHalted);
  }

  let guard = ctx.read();
  let (Some(created), Some(flow), Some(quote)) = (guard.created.clone(), guard.flow, guard.benefits) else {
    return Err(AppError::Internal("Checkout saga completed without an intent.".to_string()));
  };
  Ok(CheckoutStarted {
    method: guard.method,
    flow,
    provider_ref: created.provider_ref,
    redirect_url: created.redirect_url,
    qr_code: created.qr_code,
    total_cents: guard.total_cents,
    benefits: quote,
    promo: guard.promo.clone(),
    order_id: guard.pending_order_id,
  })
}
