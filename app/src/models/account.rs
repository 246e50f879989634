// app/src/models/account.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Customer,
  Admin,
}

impl FromStr for Role {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "admin" => Ok(Role::Admin),
      "customer" | "user" | "" => Ok(Role::Customer),
      other => Err(format!("Unknown role '{}'", other)),
    }
  }
}

/// Who is calling. Supplied by the session boundary and trusted as given.
#[derive(Debug, Clone, Serialize)]
pub struct AccountIdentity {
  pub account_id: Uuid,
  pub email: Option<String>,
  pub role: Role,
}

impl AccountIdentity {
  pub fn customer(account_id: Uuid, email: impl Into<String>) -> Self {
    Self {
      account_id,
      email: Some(email.into()),
      role: Role::Customer,
    }
  }

  pub fn admin(account_id: Uuid) -> Self {
    Self {
      account_id,
      email: None,
      role: Role::Admin,
    }
  }

  pub fn is_admin(&self) -> bool {
    self.role == Role::Admin
  }
}
