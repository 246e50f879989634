// app/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Clone)]
pub struct StripeConfig {
  pub secret_key: Option<String>,
  pub webhook_secret: Option<String>,
  pub api_base: String,
}

#[derive(Clone)]
pub struct NetsConfig {
  pub api_key: Option<String>,
  pub project_id: Option<String>,
  pub base_url: String,
}

#[derive(Clone)]
pub struct PaypalConfig {
  pub client_id: Option<String>,
  pub client_secret: Option<String>,
  pub api_base: String,
}

// Credentials are reported as present or absent, never printed.
impl fmt::Debug for StripeConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StripeConfig")
      .field("secret_key_set", &self.secret_key.is_some())
      .field("webhook_secret_set", &self.webhook_secret.is_some())
      .field("api_base", &self.api_base)
      .finish()
  }
}

impl fmt::Debug for NetsConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NetsConfig")
      .field("api_key_set", &self.api_key.is_some())
      .field("project_id_set", &self.project_id.is_some())
      .field("base_url", &self.base_url)
      .finish()
  }
}

impl fmt::Debug for PaypalConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PaypalConfig")
      .field("client_id_set", &self.client_id.is_some())
      .field("client_secret_set", &self.client_secret.is_some())
      .field("api_base", &self.api_base)
      .finish()
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// `None` runs against the in-memory store.
  pub database_url: Option<String>,
  pub app_base_url: String,
  pub currency: String,

  pub pending_order_timeout_secs: i64,
  pub refund_window_days: i64,
  pub reconcile_interval_secs: u64,
  pub gateway_poll_attempts: u32,
  pub gateway_poll_backoff_ms: u64,
  pub save10_cap_cents: i64,
  pub save10_min_spend_cents: i64,

  pub stripe: StripeConfig,
  pub nets: NetsConfig,
  pub paypal: PaypalConfig,

  pub log_format_json: bool,
  pub seed_db: bool,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server_host: "127.0.0.1".to_string(),
      server_port: 8080,
      database_url: None,
      app_base_url: "http://127.0.0.1:8080".to_string(),
      currency: "SGD".to_string(),
      pending_order_timeout_secs: 300,
      refund_window_days: 7,
      reconcile_interval_secs: 60,
      gateway_poll_attempts: 3,
      gateway_poll_backoff_ms: 500,
      save10_cap_cents: 600,
      save10_min_spend_cents: 2000,
      stripe: StripeConfig {
        secret_key: None,
        webhook_secret: None,
        api_base: "https://api.stripe.com".to_string(),
      },
      nets: NetsConfig {
        api_key: None,
        project_id: None,
        base_url: "https://sandbox.nets.openapipaas.com".to_string(),
      },
      paypal: PaypalConfig {
        client_id: None,
        client_secret: None,
        api_base: "https://api-m.sandbox.paypal.com".to_string(),
      },
      log_format_json: false,
      seed_db: false,
    }
  }
}

fn optional_env(var_name: &str) -> Option<String> {
  env::var(var_name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed_env<T>(var_name: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: fmt::Display,
{
  match optional_env(var_name) {
    Some(raw) => raw
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {}: {}", var_name, e))),
    None => Ok(default),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();
    let defaults = Self::default();

    let server_host = optional_env("SERVER_HOST").unwrap_or(defaults.server_host);
    let server_port = parsed_env("SERVER_PORT", defaults.server_port)?;
    let app_base_url =
      optional_env("APP_BASE_URL").unwrap_or_else(|| format!("http://{}:{}", server_host, server_port));

    let pending_order_timeout_secs = parsed_env("PENDING_ORDER_TIMEOUT_SECS", defaults.pending_order_timeout_secs)?;
    if pending_order_timeout_secs <= 0 {
      return Err(AppError::Config("PENDING_ORDER_TIMEOUT_SECS must be positive".to_string()));
    }
    let gateway_poll_attempts = parsed_env("GATEWAY_POLL_ATTEMPTS", defaults.gateway_poll_attempts)?;
    if gateway_poll_attempts == 0 {
      return Err(AppError::Config("GATEWAY_POLL_ATTEMPTS must be at least 1".to_string()));
    }

    let config = Self {
      server_port,
      database_url: optional_env("DATABASE_URL"),
      app_base_url,
      currency: optional_env("CURRENCY").unwrap_or(defaults.currency).to_ascii_uppercase(),
      pending_order_timeout_secs,
      refund_window_days: parsed_env("REFUND_WINDOW_DAYS", defaults.refund_window_days)?,
      reconcile_interval_secs: parsed_env("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval_secs)?,
      gateway_poll_attempts,
      gateway_poll_backoff_ms: parsed_env("GATEWAY_POLL_BACKOFF_MS", defaults.gateway_poll_backoff_ms)?,
      save10_cap_cents: parsed_env("SAVE10_CAP_CENTS", defaults.save10_cap_cents)?,
      save10_min_spend_cents: parsed_env("SAVE10_MIN_SPEND_CENTS", defaults.save10_min_spend_cents)?,
      stripe: StripeConfig {
        secret_key: optional_env("STRIPE_SECRET_KEY"),
        webhook_secret: optional_env("STRIPE_WEBHOOK_SECRET"),
        api_base: optional_env("STRIPE_API_BASE").unwrap_or(defaults.stripe.api_base),
      },
      nets: NetsConfig {
        api_key: optional_env("NETS_API_KEY"),
        project_id: optional_env("NETS_PROJECT_ID"),
        base_url: optional_env("NETS_BASE_URL").unwrap_or(defaults.nets.base_url),
      },
      paypal: PaypalConfig {
        client_id: optional_env("PAYPAL_CLIENT_ID"),
        client_secret: optional_env("PAYPAL_CLIENT_SECRET"),
        api_base: optional_env("PAYPAL_API_BASE").unwrap_or(defaults.paypal.api_base),
      },
      log_format_json: optional_env("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
      seed_db: parsed_env("SEED_DB", defaults.seed_db)?,
      server_host,
    };

    tracing::info!(
      stripe = ?config.stripe,
      nets = ?config.nets,
      paypal = ?config.paypal,
      persistent = config.database_url.is_some(),
      "Application configuration loaded successfully."
    );
    Ok(config)
  }

  pub fn pending_order_timeout(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.pending_order_timeout_secs)
  }

  pub fn refund_window(&self) -> chrono::Duration {
    chrono::Duration::days(self.refund_window_days)
  }
}
