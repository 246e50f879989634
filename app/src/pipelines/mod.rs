// app/src/pipelines/mod.rs

//! Sagas for the order/payment workflows and the entry points that run them.

use crate::errors::AppError;
use std::sync::Arc;
use tallyflow::SagaRegistry;

pub mod contexts;

pub mod cart_pipeline;
pub mod checkout_pipeline;
pub mod confirm;
pub mod finalize_pipeline;
pub mod refund_pipeline;
pub mod webhook_pipeline;

/// Registers every saga with `registry`. Called once at startup.
pub fn register_all_sagas(registry: &Arc<SagaRegistry<AppError>>) {
  tracing::info!("Registering sagas...");

  cart_pipeline::register_add_to_cart_saga(registry);
  checkout_pipeline::register_checkout_saga(registry);
  finalize_pipeline::register_finalize_saga(registry);
  webhook_pipeline::register_webhook_saga(registry);
  refund_pipeline::register_refund_approval_saga(registry);

  tracing::info!(count = registry.len(), "All sagas registered.");
}
