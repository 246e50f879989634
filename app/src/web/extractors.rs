// app/src/web/extractors.rs

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{AccountIdentity, Role};

pub const ACCOUNT_ID_HEADER: &str = "X-Account-Id";
pub const ACCOUNT_EMAIL_HEADER: &str = "X-Account-Email";
pub const ACCOUNT_ROLE_HEADER: &str = "X-Account-Role";

/// Identity placed on the request by the session layer in front of this service.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount(pub AccountIdentity);

impl AuthenticatedAccount {
  pub fn id(&self) -> Uuid {
    self.0.account_id
  }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
  req
    .headers()
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
}

fn identity_from(req: &HttpRequest) -> Result<AccountIdentity, AppError> {
  let account_id = header(req, ACCOUNT_ID_HEADER)
    .and_then(|v| Uuid::parse_str(v).ok())
    .ok_or_else(|| {
      warn!("Missing or invalid {} header.", ACCOUNT_ID_HEADER);
      AppError::Auth("Authentication required.".to_string())
    })?;
  let role = header(req, ACCOUNT_ROLE_HEADER)
    .unwrap_or("customer")
    .parse::<Role>()
    .map_err(AppError::Auth)?;
  Ok(AccountIdentity {
    account_id,
    email: header(req, ACCOUNT_EMAIL_HEADER).map(str::to_string),
    role,
  })
}

impl FromRequest for AuthenticatedAccount {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    ready(identity_from(req).map(AuthenticatedAccount))
  }
}
