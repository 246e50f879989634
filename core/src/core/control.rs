// tallyflow/src/core/control.rs

//! Flow signals returned by handlers and the outcome of a whole saga run.

/// Returned by a handler to tell the saga whether to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
  /// Run the remaining handlers of this step and then the next steps.
  Continue,
  /// Halt the saga right here. This is a graceful exit: nothing is compensated.
  Stop,
}

/// Outcome of a saga run that did not fail.
///
/// A failed run is reported through `Err` after compensation has been attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
  /// Every non-skipped step ran; optional steps may have failed and been swallowed.
  Completed,
  /// A handler returned [`StepControl::Stop`].
  Stopped,
}
