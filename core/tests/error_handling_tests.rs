// tests/error_handling_tests.rs
mod common;
use common::*;
use tallyflow::{ContextData, Saga, SagaError, StepControl};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_saga_with_saga_error_type() {
  setup_tracing();
  let mut saga = Saga::<TestContext, SagaError>::new(&[("task", false, None)]);
  saga.on_step("task", |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      ctx.write().counter = 1;
      Ok::<StepControl, SagaError>(StepControl::Continue)
    })
  });
  let ctx = ContextData::new(TestContext::default());
  assert!(saga.run(ctx.clone()).await.is_ok());
  assert_eq!(ctx.read().counter, 1);

  let mut failing = Saga::<TestContext, SagaError>::new(&[("fail_task", false, None)]);
  failing.on_step("fail_task", |_ctx| {
    Box::pin(async move { Err::<StepControl, _>(SagaError::Internal("Intentional SagaError".to_string())) })
  });
  match failing.run(ContextData::new(TestContext::default())).await.unwrap_err() {
    SagaError::Internal(s) => assert_eq!(s, "Intentional SagaError"),
    other => panic!("Expected SagaError::Internal, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_anyhow_errors_become_handler_errors() {
  setup_tracing();
  let mut saga = Saga::<TestContext, SagaError>::new(&[("io", false, None)]);
  saga.on_step("io", |_ctx: ContextData<TestContext>| {
    Box::pin(async move {
      let parsed: Result<i32, anyhow::Error> = "not-a-number".parse::<i32>().map_err(anyhow::Error::from);
      parsed.map_err(SagaError::from)?;
      Ok::<StepControl, SagaError>(StepControl::Continue)
    })
  });

  let err = saga.run(ContextData::new(TestContext::default())).await.unwrap_err();
  assert!(matches!(err, SagaError::HandlerError { .. }));
  assert!(err.to_string().contains("invalid digit"));
}
