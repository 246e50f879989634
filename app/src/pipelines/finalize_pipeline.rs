// app/src/pipelines/finalize_pipeline.rs

//! Turns one confirmed payment into exactly one PAID order.
//!
//! Every confirmation channel (redirect return, QR poll, direct capture and
//! webhook) ends here. The `(payment_method, payment_reference)` key makes the
//! saga idempotent: a second delivery of the same payment finds the settled
//! order and stops without writing anything.
//!
//! Steps, in order:
//! 1. `lookup_existing_order`: settled order found → stop; pending order found → promote it.
//! 2. `resolve_line_items`: live cart, then the pending intent snapshot, then the gateway echo.
//! 3. `commit_paid_order`: conditional promote, or atomic insert-or-fetch.
//! 4. `clear_cart` (best-effort): lines are deleted; stock stays reserved.
//! 5. `record_ledger_entry` (best-effort): a ledger failure never undoes the order.
//!
//! Only step 3 writes durable state before the best-effort steps, so there is
//! nothing to compensate when an earlier step fails.

use std::sync::Arc;
use tallyflow::{ContextData, Saga, SagaOutcome, SagaRegistry, StepControl};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::gateway::CapturedPayment;
use crate::intents::PendingIntent;
use crate::models::{
  items_total_cents, LedgerStatus, LineItem, NewLedgerEntry, NewOrder, Order, PaidUpdate, PaymentMethod, PaymentStatus,
};
use crate::pipelines::contexts::{FinalizeCtxData, FinalizeOutcome, LineSource};
use crate::services::delivery::{self, DeliveryPlan};
use crate::state::AppState;
use crate::store::{ClaimOutcome, Stores};

fn already_has_lines(ctx: ContextData<FinalizeCtxData>) -> bool {
  ctx.read().existing.is_some()
}

fn nothing_committed(ctx: ContextData<FinalizeCtxData>) -> bool {
  matches!(ctx.read().outcome, None | Some(FinalizeOutcome::AlreadyFinalized))
}

pub fn register_finalize_saga(registry: &Arc<SagaRegistry<AppError>>) {
  let mut s = Saga::<FinalizeCtxData, AppError>::new(&[
    ("lookup_existing_order", false, None),
    ("resolve_line_items", false, Some(Arc::new(already_has_lines))),
    ("commit_paid_order", false, None),
    ("clear_cart", true, Some(Arc::new(nothing_committed))),
    ("record_ledger_entry", true, Some(Arc::new(nothing_committed))),
  ]);

  s.on_step("lookup_existing_order", |ctx: ContextData<FinalizeCtxData>| {
    Box::pin(async move {
      let (stores, method, reference) = {
        let guard = ctx.read();
        (guard.app_state.stores.clone(), guard.method, guard.payment.provider_ref.clone())
      };
      let Some(order) = stores.orders.find_by_reference(method, &reference).await? else {
        return Ok::<_, AppError>(StepControl::Continue);
      };

      let mut guard = ctx.write();
      if order.payment_status.is_settled() {
        info!(order_id = %order.id, %reference, "Payment already finalized.");
        guard.account_id = Some(order.account_id);
        guard.outcome = Some(FinalizeOutcome::AlreadyFinalized);
        guard.order = Some(order);
        return Ok(StepControl::Stop);
      }
      if guard.account_id.is_some_and(|id| id != order.account_id) {
        warn!(order_id = %order.id, "Confirming account differs from the order owner; using the owner.");
      }
      guard.account_id = Some(order.account_id);
      guard.line_source = Some(LineSource::Persisted);
      guard.existing = Some(order);
      Ok(StepControl::Continue)
    })
  });

  s.on_step("resolve_line_items", |ctx: ContextData<FinalizeCtxData>| {
    Box::pin(async move {
      let (stores, account_id, reference) = {
        let guard = ctx.read();
        (guard.app_state.stores.clone(), guard.account_id, guard.payment.provider_ref.clone())
      };
      let cart: Vec<LineItem> = match account_id {
        Some(account_id) => stores.carts.lines(account_id).await?.iter().map(LineItem::from).collect(),
        None => Vec::new(),
      };

      let mut guard = ctx.write();
      let snapshot_lines = guard
        .snapshot
        .as_ref()
        .filter(|s| s.provider_ref == reference)
        .map(|s| s.lines.clone())
        .unwrap_or_default();
      let (lines, source) = if !cart.is_empty() {
        (cart, LineSource::LiveCart)
      } else if !snapshot_lines.is_empty() {
        (snapshot_lines, LineSource::Snapshot)
      } else if !guard.payment.echo_lines.is_empty() {
        (guard.payment.echo_lines.clone(), LineSource::GatewayEcho)
      } else {
        error!(%reference, ?account_id, "Paid payment has no cart, snapshot or gateway echo; needs manual follow-up.");
        return Err(AppError::EmptyCart(format!(
          "No cart or snapshot to build the order for payment {}",
          reference
        )));
      };
      if account_id.is_none() {
        error!(%reference, "Paid payment carries no account; needs manual follow-up.");
        return Err(AppError::EmptyCart(format!("No account to attribute payment {} to", reference)));
      }
      info!(%reference, source = ?source, lines = lines.len(), "Order lines resolved.");
      guard.lines = lines;
      guard.line_source = Some(source);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("commit_paid_order", |ctx: ContextData<FinalizeCtxData>| {
    Box::pin(async move {
      let (stores, existing) = {
        let guard = ctx.read();
        (guard.app_state.stores.clone(), guard.existing.clone())
      };

      if let Some(existing) = existing {
        let update = paid_update(&ctx.read(), &existing);
        return match stores.orders.mark_paid(existing.id, update).await? {
          Some(order) => {
            info!(order_id = %order.id, "Pending order marked paid.");
            let mut guard = ctx.write();
            guard.order = Some(order);
            guard.outcome = Some(FinalizeOutcome::Updated);
            Ok(StepControl::Continue)
          }
          None => settled_elsewhere(&ctx, &stores, existing.id).await,
        };
      }

      let (new_order, lines) = {
        let guard = ctx.read();
        (new_paid_order(&guard)?, guard.lines.clone())
      };
      match stores.orders.insert_or_fetch(new_order, lines).await? {
        ClaimOutcome::Created(order) => {
          info!(order_id = %order.id, total = order.total_amount_cents, "Order created from payment.");
          let mut guard = ctx.write();
          guard.order = Some(order);
          guard.outcome = Some(FinalizeOutcome::Created);
          Ok::<_, AppError>(StepControl::Continue)
        }
        ClaimOutcome::Existing(order) if order.payment_status.is_settled() => {
          info!(order_id = %order.id, "Lost the insert race to a concurrent finalize.");
          let mut guard = ctx.write();
          guard.order = Some(order);
          guard.outcome = Some(FinalizeOutcome::AlreadyFinalized);
          Ok(StepControl::Stop)
        }
        ClaimOutcome::Existing(order) => {
          let update = paid_update(&ctx.read(), &order);
          match stores.orders.mark_paid(order.id, update).await? {
            Some(order) => {
              let mut guard = ctx.write();
              guard.order = Some(order);
              guard.outcome = Some(FinalizeOutcome::Updated);
              Ok(StepControl::Continue)
            }
            None => settled_elsewhere(&ctx, &stores, order.id).await,
          }
        }
      }
    })
  });

  s.on_step("clear_cart", |ctx: ContextData<FinalizeCtxData>| {
    Box::pin(async move {
      let (stores, account_id) = {
        let guard = ctx.read();
        (guard.app_state.stores.clone(), guard.order.as_ref().map(|o| o.account_id))
      };
      if let Some(account_id) = account_id {
        let removed = stores.carts.clear(account_id).await?;
        ctx.write().cart_cleared = true;
        info!(%account_id, removed, "Cart cleared after payment.");
      }
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("record_ledger_entry", |ctx: ContextData<FinalizeCtxData>| {
    Box::pin(async move {
      let (stores, entry) = {
        let guard = ctx.read();
        let order = guard
          .order
          .as_ref()
          .ok_or_else(|| AppError::Internal("No order to record.".to_string()))?;
        let payment = &guard.payment;
        let entry = NewLedgerEntry::new(
          order.id,
          LedgerStatus::Paid,
          payment.amount_cents.unwrap_or(order.total_amount_cents),
          payment.currency.clone().unwrap_or_else(|| order.currency.clone()),
        )
        .with_payment(Some(guard.method), Some(payment.provider_ref.clone()))
        .with_payer(payment.payer_id.clone(), payment.payer_email.clone().or_else(|| order.payer_email.clone()))
        .with_capture(payment.capture_id.clone());
        (guard.app_state.stores.clone(), entry)
      };
      stores.ledger.append(entry).await?;
      ctx.write().ledger_recorded = true;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register_saga(s);
  info!("Finalize saga registered.");
}

/// The conditional promote found the order settled: someone else finalized it first.
async fn settled_elsewhere(ctx: &ContextData<FinalizeCtxData>, stores: &Stores, order_id: Uuid) -> Result<StepControl> {
  let order = stores
    .orders
    .get(order_id)
    .await?
    .ok_or_else(|| AppError::Internal(format!("Order {} vanished during finalize.", order_id)))?;
  info!(%order_id, "Order was settled by a concurrent finalize.");
  let mut guard = ctx.write();
  guard.order = Some(order);
  guard.outcome = Some(FinalizeOutcome::AlreadyFinalized);
  Ok(StepControl::Stop)
}

fn delivery_plan(ctx: &FinalizeCtxData, fallback: Option<&Order>) -> DeliveryPlan {
  ctx
    .snapshot
    .as_ref()
    .map(|s| s.delivery)
    .or_else(|| {
      fallback.map(|o| DeliveryPlan {
        delivery_type: o.delivery_type,
        scheduled_at: o.scheduled_at,
      })
    })
    .unwrap_or_else(DeliveryPlan::now)
}

fn paid_update(ctx: &FinalizeCtxData, existing: &Order) -> PaidUpdate {
  let plan = delivery_plan(ctx, Some(existing));
  let eta = delivery::compute_eta(plan, existing.total_amount_cents, ctx.payment.captured_at);
  let snapshot = ctx.snapshot.as_ref();
  PaidUpdate {
    paid_at: ctx.payment.captured_at,
    payer_email: ctx.payment.payer_email.clone(),
    delivery_type: Some(plan.delivery_type),
    scheduled_at: plan.scheduled_at,
    eta_window_start: Some(eta.start),
    eta_window_end: Some(eta.end),
    promo_code: snapshot.and_then(|s| s.promo_code.clone()),
    promo_discount_cents: snapshot.map(|s| s.promo_discount_cents),
  }
}

/// Prices come from the snapshot when we have one; otherwise the order is
/// priced from its lines and whatever the gateway says was charged.
fn new_paid_order(ctx: &FinalizeCtxData) -> Result<NewOrder> {
  let account_id = ctx
    .account_id
    .ok_or_else(|| AppError::EmptyCart("No account to attribute the payment to".to_string()))?;
  let payment = &ctx.payment;
  let subtotal = items_total_cents(&ctx.lines);
  let snapshot: Option<&PendingIntent> = ctx.snapshot.as_ref().filter(|s| s.provider_ref == payment.provider_ref);

  let (delivery_fee, benefit_discount, promo_code, promo_discount, quoted_total) = match snapshot {
    Some(s) => (
      s.delivery_fee_cents,
      s.benefit_discount_cents,
      s.promo_code.clone(),
      s.promo_discount_cents,
      s.total_cents,
    ),
    None => {
      let charged = payment.amount_cents.unwrap_or(subtotal);
      (
        (charged - subtotal).max(0),
        (subtotal - charged).max(0),
        None,
        0,
        charged,
      )
    }
  };
  let total = payment.amount_cents.unwrap_or(quoted_total);
  if total != quoted_total {
    warn!(
      reference = %payment.provider_ref,
      charged = total,
      quoted = quoted_total,
      "Charged amount differs from the quoted total; keeping the charged amount."
    );
  }

  let plan = delivery_plan(ctx, None);
  let eta = delivery::compute_eta(plan, total, payment.captured_at);
  Ok(NewOrder {
    id: Uuid::new_v4(),
    account_id,
    subtotal_cents: subtotal,
    delivery_fee_cents: delivery_fee,
    benefit_discount_cents: benefit_discount,
    promo_code,
    promo_discount_cents: promo_discount,
    total_amount_cents: total,
    currency: payment
      .currency
      .clone()
      .unwrap_or_else(|| ctx.app_state.config.currency.clone()),
    payment_method: ctx.method,
    payment_status: PaymentStatus::Paid,
    payment_reference: payment.provider_ref.clone(),
    payer_email: payment.payer_email.clone(),
    paid_at: Some(payment.captured_at),
    delivery_type: plan.delivery_type,
    scheduled_at: plan.scheduled_at,
    eta_window_start: Some(eta.start),
    eta_window_end: Some(eta.end),
    created_at: payment.captured_at,
  })
}

/// Input to [`finalize`].
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
  pub method: PaymentMethod,
  pub payment: CapturedPayment,
  /// Who is confirming, when known. An existing order's owner takes precedence.
  pub account_id: Option<Uuid>,
  pub snapshot: Option<PendingIntent>,
}

#[derive(Debug, Clone)]
pub struct Finalized {
  pub order: Order,
  pub outcome: FinalizeOutcome,
  pub line_source: Option<LineSource>,
}

#[instrument(
  name = "finalize",
  skip(state, request),
  fields(method = %request.method, reference = %request.payment.provider_ref)
)]
pub async fn finalize(state: &AppState, request: FinalizeRequest) -> Result<Finalized> {
  let ctx = ContextData::new(FinalizeCtxData {
    app_state: state.clone(),
    method: request.method,
    payment: request.payment,
    account_id: request.account_id,
    snapshot: request.snapshot,
    existing: None,
    lines: Vec::new(),
    line_source: None,
    order: None,
    outcome: None,
    cart_cleared: false,
    ledger_recorded: false,
  });
  let run = state.sagas.run(ctx.clone()).await?;

  let guard = ctx.read();
  let (Some(order), Some(outcome)) = (guard.order.clone(), guard.outcome) else {
    return Err(AppError::Internal(format!("Finalize saga ended ({:?}) without an order.", run)));
  };
  if matches!(run, SagaOutcome::Completed) && !guard.ledger_recorded {
    warn!(order_id = %order.id, "Order finalized without a ledger entry.");
  }
  state
    .intents
    .clear(order.account_id, guard.method, &guard.payment.provider_ref);
  Ok(Finalized {
    order,
    outcome,
    line_source: guard.line_source,
  })
}
