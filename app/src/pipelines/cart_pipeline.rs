// app/src/pipelines/cart_pipeline.rs

//! Cart mutations. Stock is reserved when an item enters the cart and released
//! when it leaves; clearing a cart after checkout keeps the reservation.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tallyflow::{ContextData, Saga, SagaOutcome, SagaRegistry, StepControl};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{cart_item::subtotal_cents, CartLine};
use crate::pipelines::contexts::AddToCartCtxData;
use crate::state::AppState;

pub fn register_add_to_cart_saga(registry: &Arc<SagaRegistry<AppError>>) {
  let mut s = Saga::<AddToCartCtxData, AppError>::new(&[
    ("validate_cart_input", false, None),
    ("load_product", false, None),
    ("reserve_stock", false, None),
    ("upsert_cart_line", false, None),
  ]);

  s.on_step("validate_cart_input", |ctx: ContextData<AddToCartCtxData>| {
    Box::pin(async move {
      let quantity = ctx.read().quantity;
      if quantity < 1 {
        warn!(quantity, "Rejected cart quantity.");
        return Err(AppError::Validation("Quantity must be at least 1.".to_string()));
      }
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("load_product", |ctx: ContextData<AddToCartCtxData>| {
    Box::pin(async move {
      let (stores, product_id) = {
        let guard = ctx.read();
        (guard.app_state.stores.clone(), guard.product_id)
      };
      let product = stores
        .catalog
        .get_product(product_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Product {} not found.", product_id)))?;
      ctx.write().product = Some(product);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  s.on_step("reserve_stock", |ctx: ContextData<AddToCartCtxData>| {
    Box::pin(async move {
      let (stores, product_id, quantity) = {
        let guard = ctx.read();
        (guard.app_state.stores.clone(), guard.product_id, guard.quantity)
      };
      match stores.catalog.adjust_stock(product_id, -quantity).await? {
        Some(remaining) => {
          ctx.write().reserved_units = quantity;
          info!(%product_id, quantity, remaining, "Stock reserved.");
          Ok::<_, AppError>(StepControl::Continue)
        }
        None => Err(AppError::Validation("Insufficient stock".to_string())),
      }
    })
  });

  s.compensate_step("reserve_stock", |ctx: ContextData<AddToCartCtxData>| {
    Box::pin(async move {
      let (stores, product_id, reserved) = {
        let mut guard = ctx.write();
        let reserved = std::mem::take(&mut guard.reserved_units);
        (guard.app_state.stores.clone(), guard.product_id, reserved)
      };
      if reserved > 0 {
        stores.catalog.adjust_stock(product_id, reserved).await?;
        info!(%product_id, reserved, "Stock reservation released.");
      }
      Ok::<_, AppError>(())
    })
  });

  s.on_step("upsert_cart_line", |ctx: ContextData<AddToCartCtxData>| {
    Box::pin(async move {
      let (stores, line) = {
        let guard = ctx.read();
        let product = guard
          .product
          .as_ref()
          .ok_or_else(|| AppError::Internal("Product not loaded before cart write.".to_string()))?;
        (
          guard.app_state.stores.clone(),
          CartLine {
            account_id: guard.account_id,
            product_id: product.id,
            product_name: product.name.clone(),
            unit_price_cents: product.price_cents,
            quantity: guard.quantity,
            added_at: Utc::now(),
          },
        )
      };
      let updated = stores.carts.add_line(line).await?;
      ctx.write().updated_line = Some(updated);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register_saga(s);
  info!("Add-to-cart saga registered.");
}

#[instrument(name = "cart::add_item", skip(state))]
pub async fn add_item(state: &AppState, account_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartLine> {
  let ctx = ContextData::new(AddToCartCtxData {
    app_state: state.clone(),
    account_id,
    product_id,
    quantity,
    product: None,
    reserved_units: 0,
    updated_line: None,
  });
  match state.sagas.run(ctx.clone()).await? {
    SagaOutcome::Completed => ctx
      .read()
      .updated_line
      .clone()
      .ok_or_else(|| AppError::Internal("Cart saga completed without a line.".to_string())),
    SagaOutcome::Stopped => Err(AppError::SagaHalted),
  }
}

/// Sets a line's quantity, reserving or releasing the difference.
#[instrument(name = "cart::update_quantity", skip(state))]
pub async fn update_quantity(state: &AppState, account_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartLine> {
  if quantity < 1 {
    return Err(AppError::Validation("Quantity must be at least 1.".to_string()));
  }
  let stores = &state.stores;
  let current = stores
    .carts
    .line(account_id, product_id)
    .await?
    .ok_or_else(|| AppError::NotFound("Item is not in your cart.".to_string()))?;
  let delta = quantity - current.quantity;

  if delta > 0 && stores.catalog.adjust_stock(product_id, -delta).await?.is_none() {
    return Err(AppError::Validation("Insufficient stock".to_string()));
  }
  let updated = match stores.carts.set_quantity(account_id, product_id, quantity).await {
    Ok(Some(line)) => line,
    outcome => {
      if delta > 0 {
        if let Err(e) = stores.catalog.adjust_stock(product_id, delta).await {
          error!(%product_id, delta, error = %e, "Failed to release stock after a failed cart update.");
        }
      }
      return match outcome {
        Err(e) => Err(e),
        _ => Err(AppError::NotFound("Item is not in your cart.".to_string())),
      };
    }
  };
  if delta < 0 {
    stores.catalog.adjust_stock(product_id, -delta).await?;
  }
  Ok(updated)
}

#[instrument(name = "cart::remove_item", skip(state))]
pub async fn remove_item(state: &AppState, account_id: Uuid, product_id: Uuid) -> Result<CartLine> {
  let removed = state
    .stores
    .carts
    .remove_line(account_id, product_id)
    .await?
    .ok_or_else(|| AppError::NotFound("Item is not in your cart.".to_string()))?;
  state.stores.catalog.adjust_stock(product_id, removed.quantity).await?;
  Ok(removed)
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
  pub lines: Vec<CartLine>,
  pub subtotal_cents: i64,
}

pub async fn view(state: &AppState, account_id: Uuid) -> Result<CartView> {
  let lines = state.stores.carts.lines(account_id).await?;
  let subtotal_cents = subtotal_cents(&lines);
  Ok(CartView { lines, subtotal_cents })
}
