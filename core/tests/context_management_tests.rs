// tests/context_management_tests.rs
mod common;

use common::*;
use tallyflow::{ContextData, Saga, SagaError, StepControl};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_context_data_is_shared_across_steps() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[("step1_modify", false, None), ("step2_read_modify", false, None)]);

  saga.on_step("step1_modify", |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      guard.counter = 10;
      guard.message = "SetByStep1".to_string();
      Ok::<StepControl, SagaError>(StepControl::Continue)
    })
  });

  saga.on_step("step2_read_modify", |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      assert_eq!(guard.counter, 10);
      guard.counter += 5;
      guard.message.push_str("_ThenStep2");
      Ok::<StepControl, SagaError>(StepControl::Continue)
    })
  });

  let ctx = ContextData::new(TestContext::default());
  saga.run(ctx.clone()).await.unwrap();

  let guard = ctx.read();
  assert_eq!(guard.counter, 15);
  assert_eq!(guard.message, "SetByStep1_ThenStep2");
}

#[tokio::test]
#[serial]
async fn test_context_data_clone_shares_data() {
  let original = ContextData::new(TestContext {
    counter: 1,
    ..Default::default()
  });
  let cloned = original.clone();
  assert_eq!(original.handle_count(), 2);

  original.write().counter = 5;
  assert_eq!(cloned.read().counter, 5);

  cloned.update(|c| c.counter = 10);
  assert_eq!(original.read().counter, 10);
}

#[tokio::test]
#[serial]
async fn test_snapshot_and_map_read() {
  let ctx = ContextData::new(TestContext {
    message: "hello".to_string(),
    ..Default::default()
  });
  let snap = ctx.snapshot();
  ctx.write().message.push_str(" world");

  assert_eq!(snap.message, "hello");
  assert_eq!(&*ctx.map_read(|c| &c.message), "hello world");
}

#[tokio::test]
#[serial]
async fn test_context_data_locks_released_across_await() {
  let ctx = ContextData::new(TestContext::default());

  let handler_logic = async {
    let initial = ctx.read().counter;
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    ctx.write().counter = initial + 1;
  };
  handler_logic.await;

  assert!(ctx.try_write().is_some());
  assert_eq!(ctx.read().counter, 1);
}
