// tests/saga_execution_tests.rs
mod common;

use common::*;
use std::sync::Arc;
use tallyflow::{ContextData, Saga, SagaError, SagaOutcome, StepControl};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_saga_runs_steps_in_order() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[("step1", false, None), ("step2", false, None), ("step3", false, None)]);

  saga.on_step("step1", create_simple_handler("step1", " S1"));
  saga.on_step("step2", create_simple_handler("step2", " S2"));
  saga.on_step("step3", create_simple_handler("step3", " S3"));

  let ctx = ContextData::new(TestContext::default());
  let result = saga.run(ctx.clone()).await;

  assert_eq!(result.unwrap(), SagaOutcome::Completed);
  let guard = ctx.read();
  assert_eq!(guard.counter, 3);
  assert_eq!(guard.message, " S1 S2 S3");
  assert_eq!(guard.steps_executed, vec!["step1", "step2", "step3"]);
}

#[tokio::test]
#[serial]
async fn test_saga_stops_without_compensating() {
  setup_tracing();
  reset_counters();
  let mut saga = Saga::<TestContext, TestError>::new(&[
    ("stepA", false, None),
    ("stopStep", false, None),
    ("stepC", false, None),
  ]);

  saga.on_step("stepA", create_simple_handler("stepA", "A"));
  saga.compensate_step("stepA", create_recording_compensator("stepA"));
  saga.on_step("stopStep", |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      ctx.write().steps_executed.push("stopStep".to_string());
      Ok::<StepControl, SagaError>(StepControl::Stop)
    })
  });
  saga.on_step("stepC", create_simple_handler("stepC", "C"));

  let ctx = ContextData::new(TestContext::default());
  let result = saga.run(ctx.clone()).await;

  assert_eq!(result.unwrap(), SagaOutcome::Stopped);
  let guard = ctx.read();
  assert_eq!(guard.steps_executed, vec!["stepA", "stopStep"]);
  assert!(guard.compensated.is_empty());
}

#[tokio::test]
#[serial]
async fn test_saga_propagates_required_step_error() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[
    ("good_step", false, None),
    ("bad_step", false, None),
    ("another_step", false, None),
  ]);

  saga.on_step("good_step", create_simple_handler("good_step", "Good"));
  saga.on_step("bad_step", create_failing_handler("bad_step", "I am a bad step!"));
  saga.on_step("another_step", create_simple_handler("another_step", "NeverRun"));

  let ctx = ContextData::new(TestContext::default());
  let result = saga.run(ctx.clone()).await;

  assert_eq!(result.unwrap_err(), TestError::Handler("I am a bad step!".to_string()));
  let guard = ctx.read();
  assert_eq!(guard.message, "Good");
  assert_eq!(guard.steps_executed, vec!["good_step", "bad_step"]);
}

#[tokio::test]
#[serial]
async fn test_optional_step_failure_is_swallowed() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[
    ("write_order", false, None),
    ("append_audit", true, None),
    ("clear_cart", false, None),
  ]);

  saga.on_step("write_order", create_simple_handler("write_order", "W"));
  saga.on_step("append_audit", create_failing_handler("append_audit", "audit store down"));
  saga.on_step("clear_cart", create_simple_handler("clear_cart", "C"));

  let ctx = ContextData::new(TestContext::default());
  let result = saga.run(ctx.clone()).await;

  assert_eq!(result.unwrap(), SagaOutcome::Completed);
  let guard = ctx.read();
  assert_eq!(guard.message, "WC");
  assert_eq!(guard.steps_executed, vec!["write_order", "append_audit", "clear_cart"]);
}

#[tokio::test]
#[serial]
async fn test_saga_skips_step_if_condition_met() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[
    ("step1", false, None),
    (
      "step_to_skip",
      false,
      Some(Arc::new(|ctx: ContextData<TestContext>| ctx.read().counter > 0)),
    ),
    ("step3", false, None),
  ]);

  saga.on_step("step1", create_simple_handler("step1", " S1"));
  saga.on_step("step_to_skip", create_simple_handler("step_to_skip", " SKIPPED"));
  saga.on_step("step3", create_simple_handler("step3", " S3"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(saga.run(ctx.clone()).await.unwrap(), SagaOutcome::Completed);

  let guard = ctx.read();
  assert_eq!(guard.message, " S1 S3");
  assert_eq!(guard.steps_executed, vec!["step1", "step3"]);
}

#[tokio::test]
#[serial]
async fn test_required_step_missing_handler_fails() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[("has_handler", false, None), ("no_handler", false, None)]);
  saga.on_step("has_handler", create_simple_handler("has_handler", "H"));

  let result = saga.run(ContextData::new(TestContext::default())).await;
  match result.unwrap_err() {
    TestError::Saga(s) => {
      assert!(s.contains("HandlerMissing"));
      assert!(s.contains("no_handler"));
    }
    other => panic!("Expected TestError::Saga(HandlerMissing), got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_optional_step_missing_handler_is_skipped() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[("first", false, None), ("hook_point", true, None)]);
  saga.on_step("first", create_simple_handler("first", "F"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(saga.run(ctx.clone()).await.unwrap(), SagaOutcome::Completed);
  assert_eq!(ctx.read().steps_executed, vec!["first"]);
}

#[tokio::test]
#[serial]
async fn test_before_on_after_execution_order() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[("only", false, None)]);
  saga.before_step("only", create_simple_handler("before", "b"));
  saga.on_step("only", create_simple_handler("on", "o"));
  saga.after_step("only", create_simple_handler("after", "a"));

  let ctx = ContextData::new(TestContext::default());
  saga.run(ctx.clone()).await.unwrap();
  assert_eq!(ctx.read().message, "boa");
  assert_eq!(ctx.read().steps_executed, vec!["before", "on", "after"]);
}

#[tokio::test]
#[serial]
async fn test_structural_edits_change_execution() {
  setup_tracing();
  let mut saga = Saga::<TestContext, TestError>::new(&[("a", false, None), ("c", false, None)]);
  saga.insert_after_step("a", "b", false, None);
  saga.insert_before_step("a", "start", true, None);
  assert_eq!(saga.step_names(), vec!["start", "a", "b", "c"]);

  saga.on_step("a", create_simple_handler("a", "A"));
  saga.on_step("b", create_simple_handler("b", "B"));
  saga.on_step("c", create_simple_handler("c", "C"));
  saga.remove_step("c");
  assert_eq!(saga.step_names(), vec!["start", "a", "b"]);

  saga.set_optional("b", true);
  saga.on_step("b", create_failing_handler("b2", "second b handler fails"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(saga.run(ctx.clone()).await.unwrap(), SagaOutcome::Completed);
  assert_eq!(ctx.read().message, "AB");
}

#[test]
#[should_panic(expected = "not found in saga definition")]
fn test_registering_handler_for_unknown_step_panics() {
  let mut saga = Saga::<TestContext, TestError>::new(&[("real", false, None)]);
  saga.on_step("typo", create_simple_handler("typo", "x"));
}
