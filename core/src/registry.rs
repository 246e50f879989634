// tallyflow/src/registry.rs

//! `SagaRegistry<E>`: sagas keyed by the type of context data they run on.
//!
//! Callers only hold a `ContextData<T>`; the registry finds the saga registered
//! for `T` and runs it, converting the saga's error into the application-level
//! error `E`.

use crate::core::context_data::ContextData;
use crate::core::control::SagaOutcome;
use crate::error::SagaError;
use crate::saga::definition::Saga;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// Type-erased runner so sagas over different context types share one map.
#[async_trait]
trait ErasedSagaRunner<AppErr>: Send + Sync
where
  AppErr: std::error::Error + Send + Sync + 'static,
{
  /// `ctx_obj` must hold a `ContextData<TData>` for the wrapped saga's `TData`.
  async fn run_erased(&self, ctx_obj: Box<dyn Any + Send>) -> Result<SagaOutcome, AppErr>;
}

struct SagaRunner<TData, SagaErr, AppErr>
where
  TData: 'static + Send + Sync,
  SagaErr: std::error::Error + From<SagaError> + Send + Sync + 'static,
  AppErr: std::error::Error + From<SagaErr> + From<SagaError> + Send + Sync + 'static,
{
  saga: Arc<Saga<TData, SagaErr>>,
  _app_err: PhantomData<fn() -> AppErr>,
}

#[async_trait]
impl<TData, SagaErr, AppErr> ErasedSagaRunner<AppErr> for SagaRunner<TData, SagaErr, AppErr>
where
  TData: 'static + Send + Sync,
  SagaErr: std::error::Error + From<SagaError> + Send + Sync + 'static,
  AppErr: std::error::Error + From<SagaErr> + From<SagaError> + Send + Sync + 'static,
{
  async fn run_erased(&self, ctx_obj: Box<dyn Any + Send>) -> Result<SagaOutcome, AppErr> {
    let ctx_data = match ctx_obj.downcast::<ContextData<TData>>() {
      Ok(boxed) => *boxed,
      Err(_) => {
        let expected_type = std::any::type_name::<ContextData<TData>>();
        event!(Level::ERROR, expected_type, "Context object type mismatch.");
        return Err(AppErr::from(SagaError::TypeMismatch {
          step_name: "registry_dispatch".to_string(),
          expected_type: expected_type.to_string(),
        }));
      }
    };
    self.saga.run(ctx_data).await.map_err(AppErr::from)
  }
}

/// Registry of sagas, one per context data type.
pub struct SagaRegistry<AppErr = SagaError>
where
  AppErr: std::error::Error + From<SagaError> + Send + Sync + 'static,
{
  runners: RwLock<HashMap<TypeId, Arc<dyn ErasedSagaRunner<AppErr>>>>,
}

impl<AppErr> SagaRegistry<AppErr>
where
  AppErr: std::error::Error + From<SagaError> + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      runners: RwLock::new(HashMap::new()),
    }
  }

  /// Registers `saga` for its context type, replacing any saga previously
  /// registered for the same type.
  pub fn register_saga<TData, SagaErr>(&self, saga: Saga<TData, SagaErr>)
  where
    TData: 'static + Send + Sync,
    SagaErr: std::error::Error + From<SagaError> + Send + Sync + 'static,
    AppErr: From<SagaErr>,
  {
    let context_type = std::any::type_name::<TData>();
    let runner = SagaRunner::<TData, SagaErr, AppErr> {
      saga: Arc::new(saga),
      _app_err: PhantomData,
    };
    let replaced = self
      .runners
      .write()
      .insert(TypeId::of::<TData>(), Arc::new(runner))
      .is_some();
    event!(Level::DEBUG, context_type, replaced, "Saga registered.");
  }

  pub fn is_registered<TData: 'static>(&self) -> bool {
    self.runners.read().contains_key(&TypeId::of::<TData>())
  }

  pub fn len(&self) -> usize {
    self.runners.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.runners.read().is_empty()
  }

  /// Runs the saga registered for `TData` against `ctx_data`.
  #[instrument(
    name = "SagaRegistry::run",
    skip_all,
    fields(context_type = %std::any::type_name::<TData>())
  )]
  pub async fn run<TData>(&self, ctx_data: ContextData<TData>) -> Result<SagaOutcome, AppErr>
  where
    TData: 'static + Send + Sync,
  {
    // The read guard is released before the saga is awaited.
    let runner = self.runners.read().get(&TypeId::of::<TData>()).cloned();
    let Some(runner) = runner else {
      let type_name = std::any::type_name::<TData>();
      event!(Level::ERROR, "No saga registered for context type {}.", type_name);
      return Err(AppErr::from(SagaError::ConfigurationError {
        step_name: "SagaRegistry::run".to_string(),
        message: format!("No saga registered for context type {}", type_name),
      }));
    };

    runner.run_erased(Box::new(ctx_data)).await
  }
}

impl<AppErr> Default for SagaRegistry<AppErr>
where
  AppErr: std::error::Error + From<SagaError> + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}
