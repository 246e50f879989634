use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tallyflow::{ContextData, SagaError, Saga, SagaRegistry, StepControl};
use tokio::runtime::Runtime;

#[derive(Clone, Debug, Default)]
struct BenchContext {
  counter: u64,
  reserved: u64,
}

type BenchError = SagaError;

fn increment_handler(iterations: u64) -> tallyflow::Handler<BenchContext, BenchError> {
  Box::new(move |ctx: ContextData<BenchContext>| {
    Box::pin(async move {
      let mut data = ctx.write();
      for _ in 0..iterations {
        data.counter = data.counter.wrapping_add(1);
      }
      Ok(StepControl::Continue)
    })
  })
}

fn step_defs(num_steps: usize) -> Vec<(&'static str, bool, Option<tallyflow::SkipCondition<BenchContext>>)> {
  (0..num_steps)
    .map(|i| (Box::leak(format!("step_{}", i).into_boxed_str()) as &'static str, false, None))
    .collect()
}

fn bench_linear_saga(c: &mut Criterion) {
  let mut group = c.benchmark_group("LinearSaga");
  let rt = Runtime::new().unwrap();

  for num_steps in [1usize, 5, 10] {
    for iterations in [1u64, 100] {
      let mut saga = Saga::<BenchContext, BenchError>::new(&step_defs(num_steps));
      for i in 0..num_steps {
        saga.on_step(&format!("step_{}", i), increment_handler(iterations));
      }
      let saga = Arc::new(saga);

      group.throughput(Throughput::Elements(num_steps as u64 * iterations));
      group.bench_with_input(
        BenchmarkId::new(format!("{}steps_{}iter", num_steps, iterations), num_steps),
        &num_steps,
        |b, _| {
          b.to_async(&rt).iter_batched(
            || ContextData::new(BenchContext::default()),
            |ctx| {
              let saga = saga.clone();
              async move { saga.run(ctx).await.unwrap() }
            },
            criterion::BatchSize::SmallInput,
          );
        },
      );
    }
  }
  group.finish();
}

fn bench_compensation_unwind(c: &mut Criterion) {
  let mut group = c.benchmark_group("CompensationUnwind");
  let rt = Runtime::new().unwrap();

  for num_steps in [2usize, 5, 10] {
    let mut defs = step_defs(num_steps);
    defs.push(("fail", false, None));
    let mut saga = Saga::<BenchContext, BenchError>::new(&defs);
    for i in 0..num_steps {
      let name = format!("step_{}", i);
      saga.on_step(&name, |ctx: ContextData<BenchContext>| {
        Box::pin(async move {
          ctx.write().reserved += 1;
          Ok::<_, BenchError>(StepControl::Continue)
        })
      });
      saga.compensate_step(&name, |ctx: ContextData<BenchContext>| {
        Box::pin(async move {
          ctx.write().reserved -= 1;
          Ok::<_, BenchError>(())
        })
      });
    }
    saga.on_step("fail", |_ctx: ContextData<BenchContext>| {
      Box::pin(async { Err::<StepControl, _>(SagaError::Internal("bench failure".to_string())) })
    });
    let saga = Arc::new(saga);

    group.bench_with_input(BenchmarkId::from_parameter(num_steps), &num_steps, |b, _| {
      b.to_async(&rt).iter_batched(
        || ContextData::new(BenchContext::default()),
        |ctx| {
          let saga = saga.clone();
          async move { saga.run(ctx).await.unwrap_err() }
        },
        criterion::BatchSize::SmallInput,
      );
    });
  }
  group.finish();
}

fn bench_registry_dispatch(c: &mut Criterion) {
  let mut group = c.benchmark_group("RegistryDispatch");
  let rt = Runtime::new().unwrap();

  let registry = Arc::new(SagaRegistry::<BenchError>::new());
  let mut saga = Saga::<BenchContext, BenchError>::new(&[("only", false, None)]);
  saga.on_step("only", increment_handler(1));
  registry.register_saga(saga);

  group.bench_function("single_step", |b| {
    b.to_async(&rt).iter_batched(
      || ContextData::new(BenchContext::default()),
      |ctx| {
        let registry = registry.clone();
        async move { registry.run(ctx).await.unwrap() }
      },
      criterion::BatchSize::SmallInput,
    );
  });
  group.finish();
}

criterion_group!(benches, bench_linear_saga, bench_compensation_unwind, bench_registry_dispatch);
criterion_main!(benches);
