// app/src/services/wallet.rs

use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::WalletEntry;
use crate::store::WalletStore;

/// Store credit for a refunded order.
#[instrument(name = "wallet::credit", skip(wallets))]
pub async fn credit(wallets: &dyn WalletStore, account_id: Uuid, amount_cents: i64, reference: &str) -> Result<i64> {
  if amount_cents <= 0 {
    return Err(AppError::Validation("Credit amount must be positive.".to_string()));
  }
  let balance = wallets.post(account_id, amount_cents, reference).await?;
  info!(balance, "Wallet credited.");
  Ok(balance)
}

/// Reverses an earlier credit with a negative movement.
#[instrument(name = "wallet::reverse", skip(wallets))]
pub async fn reverse(wallets: &dyn WalletStore, account_id: Uuid, amount_cents: i64, reference: &str) -> Result<i64> {
  let balance = wallets
    .post(account_id, -amount_cents.abs(), &format!("reversal:{}", reference))
    .await?;
  info!(balance, "Wallet credit reversed.");
  Ok(balance)
}

pub async fn statement(wallets: &dyn WalletStore, account_id: Uuid) -> Result<(i64, Vec<WalletEntry>)> {
  let balance = wallets.balance(account_id).await?;
  let history = wallets.history(account_id).await?;
  Ok((balance, history))
}
