// tallyflow/examples/reserve_and_unwind.rs

use tallyflow::{ContextData, SagaError, Saga, StepControl};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum ExampleError {
  #[error("Out of stock for {0}")]
  OutOfStock(String),

  #[error(transparent)]
  Saga(#[from] SagaError),
}

#[derive(Clone, Debug, Default)]
struct ReserveContext {
  sku: String,
  reserved: bool,
  charged: bool,
  fail_charge: bool,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let mut saga = Saga::<ReserveContext, ExampleError>::new(&[
    ("reserve", false, None),
    ("charge", false, None),
    ("notify", true, None),
  ]);

  saga.on_step("reserve", |ctx: ContextData<ReserveContext>| {
    Box::pin(async move {
      let sku = ctx.read().sku.clone();
      if sku.is_empty() {
        return Err(ExampleError::OutOfStock(sku));
      }
      info!(%sku, "Reserved one unit.");
      ctx.write().reserved = true;
      Ok(StepControl::Continue)
    })
  });
  saga.compensate_step("reserve", |ctx: ContextData<ReserveContext>| {
    Box::pin(async move {
      warn!("Releasing reservation.");
      ctx.write().reserved = false;
      Ok::<_, ExampleError>(())
    })
  });

  saga.on_step("charge", |ctx: ContextData<ReserveContext>| {
    Box::pin(async move {
      if ctx.read().fail_charge {
        return Err(ExampleError::Saga(SagaError::Internal("card declined".to_string())));
      }
      ctx.write().charged = true;
      Ok(StepControl::Continue)
    })
  });

  saga.on_step("notify", |_ctx: ContextData<ReserveContext>| {
    Box::pin(async move { Err::<StepControl, _>(ExampleError::Saga(SagaError::Internal("mailer offline".to_string()))) })
  });

  let happy = ContextData::new(ReserveContext {
    sku: "SKU-1".to_string(),
    ..Default::default()
  });
  let outcome = saga.run(happy.clone()).await;
  info!(?outcome, state = ?happy.snapshot(), "Happy path finished; notify failure was swallowed.");

  let declined = ContextData::new(ReserveContext {
    sku: "SKU-1".to_string(),
    fail_charge: true,
    ..Default::default()
  });
  let outcome = saga.run(declined.clone()).await;
  info!(?outcome, state = ?declined.snapshot(), "Declined charge unwound the reservation.");
}
