// tallyflow/src/saga/mod.rs

//! The `Saga<TData, Err>` type: definition, handler registration and execution.

pub mod definition;
pub mod execution;
pub mod hooks;

pub use definition::Saga;
