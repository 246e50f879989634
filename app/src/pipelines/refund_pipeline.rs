// app/src/pipelines/refund_pipeline.rs

//! Admin approval of an outstanding refund request.
//!
//! One saga for both modes: LIVE refunds through the gateway, MANUAL credits
//! the customer's wallet. The order update is conditional on the request still
//! being outstanding; if it lost that race the wallet credit is reversed. A
//! gateway refund cannot be recalled, so that case is logged for follow-up.
//! A gateway failure leaves the request REQUESTED for a retry.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tallyflow::{ContextData, Saga, SagaOutcome, SagaRegistry, StepControl};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::gateway::RefundReceipt;
use crate::models::{AccountIdentity, LedgerStatus, NewLedgerEntry, Order, RefundResolution, RefundStatus};
use crate::pipelines::contexts::RefundApprovalCtxData;
use crate::services::refunds::{self, RefundMode, RefundScope};
use crate::services::wallet;
use crate::state::AppState;

pub fn register_refund_approval_saga(registry: &Arc<SagaRegistry<AppError>>) {
  let mut s = Saga::<RefundApprovalCtxData, AppError>::new(&[
    ("authorize_reviewer", false, None),
    ("claim_order", false, None),
    ("load_request", false, None),
    ("issue_refund", false, None),
    ("resolve_order", false, None),
    ("record_ledger_entry", true, None),
  ]);

  s.on_step("authorize_reviewer", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      refunds::require_admin(&ctx.read().reviewer)?;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("claim_order", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      let claim = guard
        .app_state
        .refund_claims
        .try_claim(guard.order_id)
        .ok_or_else(|| AppError::Conflict("This refund is already being processed.".to_string()))?;
      guard.claim = Some(claim);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.compensate_step("claim_order", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      ctx.write().claim.take();
      Ok::<_, AppError>(())
    })
  });

  s.on_step("load_request", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      let (stores, order_id, mode, scope, override_cents) = {
        let guard = ctx.read();
        (
          guard.app_state.stores.clone(),
          guard.order_id,
          guard.mode,
          guard.scope,
          guard.override_cents,
        )
      };
      let order = refunds::load(&stores, order_id).await?;
      if order.refund_status != RefundStatus::Requested {
        return Err(refunds::no_pending_request());
      }
      let amount = refunds::refund_amount(&order, scope, override_cents)?;

      let target_ref = match mode {
        RefundMode::Manual => None,
        RefundMode::Live => {
          if !order.payment_method.is_some_and(|m| m.is_refundable()) {
            return Err(AppError::Validation(
              "Refunds available for card/PayPal payments only.".to_string(),
            ));
          }
          let ledger = stores.ledger.for_order(order_id).await?;
          Some(
            refunds::refund_target(&order, &ledger)
              .ok_or_else(|| AppError::Validation("No payment reference to refund against.".to_string()))?,
          )
        }
      };

      info!(%order_id, amount, ?mode, "Refund request loaded.");
      let mut guard = ctx.write();
      guard.amount_cents = amount;
      guard.target_ref = target_ref;
      guard.order = Some(order);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("issue_refund", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      let (state, order, mode, amount, target_ref) = {
        let guard = ctx.read();
        let order = guard
          .order
          .clone()
          .ok_or_else(|| AppError::Internal("Refund order not loaded.".to_string()))?;
        (guard.app_state.clone(), order, guard.mode, guard.amount_cents, guard.target_ref.clone())
      };

      let receipt = match mode {
        RefundMode::Live => {
          let method = order
            .payment_method
            .ok_or_else(|| AppError::Validation("Order has no payment method.".to_string()))?;
          let target = target_ref.ok_or_else(|| AppError::Internal("Refund target not resolved.".to_string()))?;
          // Omitting the amount asks the provider for a full refund.
          let amount_arg = (order.refunded_amount_cents > 0 || amount < order.total_amount_cents).then_some(amount);
          state
            .gateways
            .get(method)?
            .refund(&target, amount_arg, &order.currency)
            .await?
        }
        RefundMode::Manual => {
          wallet::credit(
            state.stores.wallets.as_ref(),
            order.account_id,
            amount,
            &format!("refund:{}", order.id),
          )
          .await?;
          ctx.write().wallet_credited = true;
          RefundReceipt {
            refund_id: format!("wallet_{}", Uuid::new_v4().simple()),
            status: "COMPLETED".to_string(),
          }
        }
      };
      info!(order_id = %order.id, refund_id = %receipt.refund_id, status = %receipt.status, "Refund issued.");
      ctx.write().receipt = Some(receipt);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.compensate_step("issue_refund", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      let (stores, order, amount, credited, receipt) = {
        let mut guard = ctx.write();
        let credited = std::mem::take(&mut guard.wallet_credited);
        (
          guard.app_state.stores.clone(),
          guard.order.clone(),
          guard.amount_cents,
          credited,
          guard.receipt.clone(),
        )
      };
      let Some(order) = order else {
        return Ok(());
      };
      if credited {
        wallet::reverse(stores.wallets.as_ref(), order.account_id, amount, &format!("refund:{}", order.id)).await?;
      } else if let Some(receipt) = receipt {
        error!(
          order_id = %order.id,
          refund_id = %receipt.refund_id,
          amount,
          "Gateway refund issued but the order was not updated; reconcile manually."
        );
      }
      Ok::<_, AppError>(())
    })
  });

  s.on_step("resolve_order", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      let (stores, order, amount) = {
        let guard = ctx.read();
        let order = guard
          .order
          .clone()
          .ok_or_else(|| AppError::Internal("Refund order not loaded.".to_string()))?;
        (guard.app_state.stores.clone(), order, guard.amount_cents)
      };
      let (refunded_total, status) = refunds::status_after_refund(&order, amount);
      let resolved = stores
        .orders
        .resolve_refund(
          order.id,
          RefundResolution::Approved {
            refunded_total_cents: refunded_total,
            payment_status: status,
            reviewed_at: Utc::now(),
          },
        )
        .await?
        .ok_or_else(refunds::no_pending_request)?;
      info!(order_id = %order.id, status = %resolved.payment_status, refunded_total, "Refund approved.");
      ctx.write().resolved = Some(resolved);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("record_ledger_entry", |ctx: ContextData<RefundApprovalCtxData>| {
    Box::pin(async move {
      let (stores, entry) = {
        let guard = ctx.read();
        let order = guard
          .resolved
          .as_ref()
          .ok_or_else(|| AppError::Internal("No resolved order to record.".to_string()))?;
        let entry = NewLedgerEntry::new(order.id, LedgerStatus::Refunded, guard.amount_cents, &order.currency)
          .with_payment(order.payment_method, order.payment_reference.clone())
          .with_payer(Some(order.account_id.to_string()), order.payer_email.clone())
          .with_capture(guard.target_ref.clone())
          .with_refund(guard.receipt.as_ref().map(|r| r.refund_id.clone()), guard.note.clone());
        (guard.app_state.stores.clone(), entry)
      };
      stores.ledger.append(entry).await?;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register_saga(s);
  info!("Refund approval saga registered.");
}

#[derive(Debug, Clone)]
pub struct ApproveRefund {
  pub mode: RefundMode,
  pub scope: RefundScope,
  pub amount_cents: Option<i64>,
  pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundApproved {
  pub order: Order,
  pub amount_cents: i64,
  pub refund_id: Option<String>,
}

#[instrument(name = "refunds::approve", skip(state, reviewer, request), fields(reviewer = %reviewer.account_id))]
pub async fn approve(
  state: &AppState,
  order_id: Uuid,
  reviewer: &AccountIdentity,
  request: ApproveRefund,
) -> Result<RefundApproved> {
  let ctx = ContextData::new(RefundApprovalCtxData {
    app_state: state.clone(),
    order_id,
    reviewer: reviewer.clone(),
    mode: request.mode,
    scope: request.scope,
    override_cents: request.amount_cents,
    note: request.note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
    claim: None,
    order: None,
    amount_cents: 0,
    target_ref: None,
    receipt: None,
    wallet_credited: false,
    resolved: None,
  });
  let outcome = state.sagas.run(ctx.clone()).await;
  // Release the claim whatever happened.
  let mut guard = ctx.write();
  guard.claim.take();
  if outcome? == SagaOutcome::Stopped {
    return Err(AppError::SagaHalted);
  }
  let order = guard
    .resolved
    .clone()
    .ok_or_else(|| AppError::Internal("Refund saga completed without an order.".to_string()))?;
  Ok(RefundApproved {
    order,
    amount_cents: guard.amount_cents,
    refund_id: guard.receipt.as_ref().map(|r| r.refund_id.clone()),
  })
}
