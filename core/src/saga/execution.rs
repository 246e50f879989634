// tallyflow/src/saga/execution.rs

//! `Saga::run()`: step execution, best-effort steps and reverse-order compensation.

use crate::core::context_data::ContextData;
use crate::core::control::{SagaOutcome, StepControl};
use crate::core::handler::Handler;
use crate::core::step::StepDef;
use crate::error::SagaError;
use crate::saga::definition::Saga;
use tracing::{event, instrument, span, Instrument, Level};

/// What happened to a single step.
enum StepRun<Err> {
  Skipped,
  Completed,
  Stopped,
  /// An optional step failed; the error has already been logged.
  Swallowed,
  Failed(Err),
}

impl<TData, Err> Saga<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<SagaError> + Send + Sync + 'static,
{
  /// Executes the saga against `ctx_data`.
  ///
  /// Steps run in declaration order, each through its `before`, `on` and
  /// `after` handlers. On the first failure of a required step, the
  /// compensators of all completed steps run last-to-first and the failure is
  /// returned. A `Stop` from any handler ends the run without compensation.
  #[instrument(
    name = "Saga::run",
    skip_all,
    fields(
      saga_context_type = %std::any::type_name::<TData>(),
      num_steps = self.steps.len(),
    ),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<SagaOutcome, Err> {
    event!(Level::DEBUG, "Saga execution starting.");
    let mut completed: Vec<&str> = Vec::with_capacity(self.steps.len());

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_span = span!(
        Level::INFO,
        "saga_step",
        step_name = step_def.name.as_str(),
        step_index = step_idx,
        optional = step_def.optional
      );

      match self.run_step(step_def, &ctx_data).instrument(step_span).await {
        StepRun::Skipped | StepRun::Swallowed => {}
        StepRun::Completed => completed.push(step_def.name.as_str()),
        StepRun::Stopped => {
          event!(Level::INFO, step = %step_def.name, "Saga stopped by a handler.");
          return Ok(SagaOutcome::Stopped);
        }
        StepRun::Failed(err) => {
          self.compensate(&completed, &ctx_data).await;
          return Err(err);
        }
      }
    }

    event!(Level::DEBUG, "Saga execution completed.");
    Ok(SagaOutcome::Completed)
  }

  fn has_any_handler(&self, step_name: &str) -> bool {
    [&self.before, &self.on, &self.after]
      .iter()
      .any(|phase| phase.get(step_name).is_some_and(|handlers| !handlers.is_empty()))
  }

  async fn run_step(&self, step_def: &StepDef<TData>, ctx_data: &ContextData<TData>) -> StepRun<Err> {
    let step_name = step_def.name.as_str();

    if step_def.should_skip(ctx_data) {
      event!(Level::INFO, "Step skipped by its skip_if condition.");
      return StepRun::Skipped;
    }

    if !self.has_any_handler(step_name) {
      if step_def.optional {
        event!(Level::DEBUG, "Optional step has no handlers, skipping.");
        return StepRun::Skipped;
      }
      event!(Level::ERROR, "Required step has no handlers.");
      return StepRun::Failed(Err::from(SagaError::HandlerMissing {
        step_name: step_def.name.clone(),
      }));
    }

    let phases = [
      ("before", self.before.get(step_name)),
      ("on", self.on.get(step_name)),
      ("after", self.after.get(step_name)),
    ];

    for (phase, handlers) in phases {
      match Self::run_phase(phase, handlers, ctx_data).await {
        Ok(StepControl::Continue) => {}
        Ok(StepControl::Stop) => return StepRun::Stopped,
        Err(err) if step_def.optional => {
          event!(Level::WARN, phase, error = %err, "Optional step failed; continuing without it.");
          return StepRun::Swallowed;
        }
        Err(err) => {
          event!(Level::ERROR, phase, error = %err, "Required step failed.");
          return StepRun::Failed(err);
        }
      }
    }

    event!(Level::DEBUG, "Step finished.");
    StepRun::Completed
  }

  async fn run_phase(
    phase: &'static str,
    handlers: Option<&Vec<Handler<TData, Err>>>,
    ctx_data: &ContextData<TData>,
  ) -> Result<StepControl, Err> {
    for (handler_index, handler_fn) in handlers.into_iter().flatten().enumerate() {
      let handler_span = span!(Level::DEBUG, "saga_handler", phase, handler_index);
      if handler_fn(ctx_data.clone()).instrument(handler_span).await? == StepControl::Stop {
        return Ok(StepControl::Stop);
      }
    }
    Ok(StepControl::Continue)
  }

  /// Runs compensators for `completed` steps, most recent first.
  ///
  /// A failing compensator is logged and the remaining ones still run; the
  /// caller returns the original step error regardless.
  async fn compensate(&self, completed: &[&str], ctx_data: &ContextData<TData>) {
    let pending: Vec<&str> = completed
      .iter()
      .rev()
      .copied()
      .filter(|name| self.compensators.contains_key(*name))
      .collect();
    if pending.is_empty() {
      return;
    }
    event!(Level::WARN, steps = ?pending, "Compensating completed steps in reverse order.");

    for step_name in pending {
      let Some(compensator) = self.compensators.get(step_name) else {
        continue;
      };
      let comp_span = span!(Level::INFO, "saga_compensation", step_name);
      match compensator(ctx_data.clone()).instrument(comp_span).await {
        Ok(()) => event!(Level::INFO, step = step_name, "Step compensated."),
        Err(err) => event!(
          Level::ERROR,
          step = step_name,
          error = %err,
          "Compensation failed; manual repair may be required."
        ),
      }
    }
  }
}
