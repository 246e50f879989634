// app/src/gateway/poll.rs

use std::time::Duration;
use tracing::{debug, warn};

use super::{PaymentGateway, RemoteStatus};
use crate::errors::Result;

/// Bounded polling policy for QR-style gateways.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
  pub attempts: u32,
  pub backoff: Duration,
}

impl PollPolicy {
  pub fn new(attempts: u32, backoff: Duration) -> Self {
    Self {
      attempts: attempts.max(1),
      backoff,
    }
  }
}

/// Queries `provider_ref` until it reaches a terminal state or the attempts run out.
///
/// Returns `Pending` when attempts are exhausted. Query errors count as an attempt;
/// the last error is returned only if no attempt succeeded at all.
pub async fn poll_until_settled(
  gateway: &dyn PaymentGateway,
  provider_ref: &str,
  policy: PollPolicy,
) -> Result<RemoteStatus> {
  let mut last_error = None;
  let mut any_answer = false;

  for attempt in 1..=policy.attempts {
    match gateway.query_intent(provider_ref).await {
      Ok(RemoteStatus::Pending) => {
        any_answer = true;
        debug!(provider = %gateway.method(), provider_ref, attempt, "Payment still pending.");
      }
      Ok(terminal) => return Ok(terminal),
      Err(e) => {
        warn!(provider = %gateway.method(), provider_ref, attempt, error = %e, "Payment status query failed.");
        last_error = Some(e);
      }
    }
    if attempt < policy.attempts {
      tokio::time::sleep(policy.backoff).await;
    }
  }

  match last_error {
    Some(e) if !any_answer => Err(e),
    _ => Ok(RemoteStatus::Pending),
  }
}
