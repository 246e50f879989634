// tallyflow/src/lib.rs

//! tallyflow: an asynchronous, type-safe saga engine.
//!
//! A saga is an ordered list of named steps. Each step carries `before`, `on`
//! and `after` handlers that run against a shared [`ContextData`], an optional
//! `skip_if` predicate, and optionally a compensator. When a required step
//! fails, the compensators of every step that already completed run in reverse
//! order and the original error is returned. Optional steps are best-effort:
//! their failures are logged and swallowed.
//!
//! ```ignore
//! let mut saga = Saga::<Ctx, MyError>::new(&[("reserve", false, None), ("write", false, None)]);
//! saga.on_step("reserve", |ctx| Box::pin(async move { /* ... */ Ok::<_, MyError>(StepControl::Continue) }));
//! saga.compensate_step("reserve", |ctx| Box::pin(async move { /* release */ Ok::<_, MyError>(()) }));
//! saga.on_step("write", |ctx| Box::pin(async move { /* ... */ Ok::<_, MyError>(StepControl::Continue) }));
//! let registry = SagaRegistry::<MyError>::new();
//! registry.register_saga(saga);
//! registry.run(ContextData::new(Ctx::default())).await?;
//! ```

pub mod core;
pub mod error;
pub mod registry;
pub mod saga;

pub use crate::core::context_data::ContextData;
pub use crate::core::control::{SagaOutcome, StepControl};
pub use crate::core::handler::{Compensator, Handler};
pub use crate::core::step::{SkipCondition, StepDef};

pub use crate::saga::definition::Saga;

pub use crate::error::{SagaError, SagaResult};

pub use crate::registry::SagaRegistry;
