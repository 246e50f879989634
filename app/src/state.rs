// app/src/state.rs

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::gateway::GatewayRegistry;
use crate::intents::IntentRegistry;
use crate::services::refunds::RefundClaims;
use crate::store::Stores;
use std::sync::Arc;
use tallyflow::SagaRegistry;

#[derive(Clone)]
pub struct AppState {
  pub stores: Stores,
  pub sagas: Arc<SagaRegistry<AppError>>,
  pub gateways: Arc<GatewayRegistry>,
  pub intents: Arc<IntentRegistry>,
  pub refund_claims: RefundClaims,
  pub config: Arc<AppConfig>,
}

impl AppState {
  /// Builds the state and registers every saga on a fresh registry.
  pub fn new(stores: Stores, gateways: GatewayRegistry, config: AppConfig) -> Self {
    let state = Self {
      stores,
      sagas: Arc::new(SagaRegistry::new()),
      gateways: Arc::new(gateways),
      intents: Arc::new(IntentRegistry::new()),
      refund_claims: RefundClaims::new(),
      config: Arc::new(config),
    };
    crate::pipelines::register_all_sagas(&state.sagas);
    state
  }
}
