// tallyflow/src/core/handler.rs

//! Boxed handler and compensator signatures stored by a [`Saga`](crate::Saga).

use crate::core::context_data::ContextData;
use crate::core::control::StepControl;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A step handler.
///
/// Receives a clone of the run's [`ContextData`], performs its work (dropping
/// any lock guard before awaiting), and returns whether the saga continues.
pub type Handler<TData, Err> =
  Box<dyn Fn(ContextData<TData>) -> BoxFuture<Result<StepControl, Err>> + Send + Sync>;

/// Undo action for a step that has already completed.
///
/// Invoked only when a later required step fails. It sees the context as it
/// stands at failure time, so it can read whatever the forward handler recorded.
pub type Compensator<TData, Err> = Box<dyn Fn(ContextData<TData>) -> BoxFuture<Result<(), Err>> + Send + Sync>;
