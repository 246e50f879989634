// app/src/lib.rs

//! Checkout backend: carts with stock reservation, multi-gateway payment,
//! idempotent order finalization, refunds, subscriptions and delivery.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod intents;
pub mod models;
pub mod pipelines;
pub mod services;
pub mod state;
pub mod store;
pub mod web;
