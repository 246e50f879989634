// app/src/services/promo.rs

//! Promo code evaluation.
//!
//! Codes are looked up in the promo store first; when nothing matches, the
//! legacy `SAVE10` rule applies. Evaluation never fails: a store error is
//! logged and treated as "no stored code".

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, Result};
use crate::store::PromoStore;

pub const LEGACY_CODE: &str = "SAVE10";
const LEGACY_PERCENT: f64 = 10.0;

/// Limits of the legacy rule.
#[derive(Debug, Clone, Copy)]
pub struct LegacyRule {
  pub cap_cents: i64,
  pub min_spend_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromoOutcome {
  pub applied: bool,
  pub discount_cents: i64,
  pub message: String,
  /// Normalised code, set when a rule matched.
  pub code: Option<String>,
  pub percent_off: Option<f64>,
}

impl PromoOutcome {
  fn rejected(message: impl Into<String>) -> Self {
    Self {
      applied: false,
      discount_cents: 0,
      message: message.into(),
      code: None,
      percent_off: None,
    }
  }

  /// Converts a rejected outcome into the checkout error.
  pub fn require_applied(self) -> Result<Self> {
    if self.applied {
      Ok(self)
    } else {
      Err(AppError::InvalidPromo(self.message))
    }
  }
}

pub async fn apply(
  promos: &dyn PromoStore,
  rule: LegacyRule,
  code: &str,
  subtotal_cents: i64,
  now: DateTime<Utc>,
) -> PromoOutcome {
  let clean = code.trim().to_uppercase();
  if clean.is_empty() {
    return PromoOutcome::rejected("");
  }

  match promos.find_active(&clean, now).await {
    Ok(Some(promo)) if promo.is_usable_at(now) => {
      let pct = promo.percent_off.clamp(0.0, 100.0);
      let discount_cents = percent_of(subtotal_cents, pct);
      debug!(code = %promo.code, pct, discount_cents, "Stored promo matched.");
      if discount_cents <= 0 {
        return PromoOutcome {
          code: Some(promo.code),
          percent_off: Some(pct),
          ..PromoOutcome::rejected("Promo code gives no discount on this order.")
        };
      }
      return PromoOutcome {
        applied: true,
        discount_cents,
        message: format!("Promo applied: {} ({}% off)", promo.code, pct),
        code: Some(promo.code),
        percent_off: Some(pct),
      };
    }
    Ok(_) => {}
    Err(e) => warn!(error = %e, "Promo lookup failed; using the legacy rule."),
  }

  if clean != LEGACY_CODE {
    return PromoOutcome::rejected("Promo code not recognized");
  }
  if subtotal_cents < rule.min_spend_cents {
    return PromoOutcome::rejected(format!("Minimum spend ${} required", rule.min_spend_cents / 100));
  }
  PromoOutcome {
    applied: true,
    discount_cents: percent_of(subtotal_cents, LEGACY_PERCENT).min(rule.cap_cents),
    message: format!("Promo applied: {}", LEGACY_CODE),
    code: Some(LEGACY_CODE.to_string()),
    percent_off: Some(LEGACY_PERCENT),
  }
}

fn percent_of(amount_cents: i64, pct: f64) -> i64 {
  (amount_cents as f64 * pct / 100.0).round() as i64
}
