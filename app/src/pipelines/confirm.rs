// app/src/pipelines/confirm.rs

//! Confirmation entry points, one per gateway flow. Each one learns from the
//! provider that the payment went through and hands it to the finalize saga.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::Result;
use crate::gateway::poll::{poll_until_settled, PollPolicy};
use crate::gateway::RemoteStatus;
use crate::models::PaymentMethod;
use crate::pipelines::contexts::{FinalizeOutcome, LineSource};
use crate::pipelines::finalize_pipeline::{finalize, FinalizeRequest, Finalized};
use crate::state::AppState;

/// Result of a QR status poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
  Paid(Finalized),
  Pending,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollState {
  Paid,
  Pending,
  Failed,
}

impl PollOutcome {
  pub fn state(&self) -> PollState {
    match self {
      PollOutcome::Paid(_) => PollState::Paid,
      PollOutcome::Pending => PollState::Pending,
      PollOutcome::Failed => PollState::Failed,
    }
  }
}

/// A settled order for this payment means a repeat confirmation; the provider
/// is not asked again.
async fn already_finalized(
  state: &AppState,
  account_id: Uuid,
  method: PaymentMethod,
  reference: &str,
) -> Result<Option<Finalized>> {
  let Some(order) = state.stores.orders.find_by_reference(method, reference).await? else {
    return Ok(None);
  };
  if !order.payment_status.is_settled() || order.account_id != account_id {
    return Ok(None);
  }
  info!(order_id = %order.id, reference, "Repeat confirmation for a finalized payment.");
  state.intents.clear(account_id, method, reference);
  Ok(Some(Finalized {
    order,
    outcome: FinalizeOutcome::AlreadyFinalized,
    line_source: Some(LineSource::Persisted),
  }))
}

async fn capture_and_finalize(state: &AppState, account_id: Uuid, method: PaymentMethod, reference: &str) -> Result<Finalized> {
  if let Some(finalized) = already_finalized(state, account_id, method, reference).await? {
    return Ok(finalized);
  }
  let gateway = state.gateways.get(method)?;
  let payment = gateway.capture_intent(reference).await?;
  let snapshot = state.intents.resolve(account_id, method, reference);
  if snapshot.is_none() {
    info!(%account_id, reference, "No matching pending intent; relying on the order record or gateway echo.");
  }
  finalize(
    state,
    FinalizeRequest {
      method,
      payment,
      account_id: Some(account_id),
      snapshot,
    },
  )
  .await
}

/// Return leg of a redirect checkout.
#[instrument(name = "confirm::redirect", skip(state))]
pub async fn confirm_redirect(state: &AppState, account_id: Uuid, session_ref: &str) -> Result<Finalized> {
  capture_and_finalize(state, account_id, PaymentMethod::Stripe, session_ref).await
}

/// Approval leg of a direct-capture checkout.
#[instrument(name = "confirm::capture_direct", skip(state))]
pub async fn capture_direct(state: &AppState, account_id: Uuid, order_ref: &str) -> Result<Finalized> {
  capture_and_finalize(state, account_id, PaymentMethod::Paypal, order_ref).await
}

/// Bounded status poll for a QR payment.
#[instrument(name = "confirm::poll_qr", skip(state))]
pub async fn poll_qr(state: &AppState, account_id: Uuid, txn_ref: &str) -> Result<PollOutcome> {
  if let Some(finalized) = already_finalized(state, account_id, PaymentMethod::NetsQr, txn_ref).await? {
    return Ok(PollOutcome::Paid(finalized));
  }
  let gateway = state.gateways.get(PaymentMethod::NetsQr)?;
  let policy = PollPolicy::new(
    state.config.gateway_poll_attempts,
    Duration::from_millis(state.config.gateway_poll_backoff_ms),
  );
  match poll_until_settled(gateway.as_ref(), txn_ref, policy).await? {
    RemoteStatus::Paid => {
      let finalized = capture_and_finalize(state, account_id, PaymentMethod::NetsQr, txn_ref).await?;
      Ok(PollOutcome::Paid(finalized))
    }
    RemoteStatus::Failed => {
      let cleared = state.intents.clear(account_id, PaymentMethod::NetsQr, txn_ref);
      warn!(%account_id, txn_ref, cleared, "QR payment failed.");
      Ok(PollOutcome::Failed)
    }
    RemoteStatus::Pending => Ok(PollOutcome::Pending),
  }
}
