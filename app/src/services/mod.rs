// app/src/services/mod.rs

//! Domain services called by handlers and saga steps.

pub mod benefits;
pub mod delivery;
pub mod orders;
pub mod promo;
pub mod reconciler;
pub mod refunds;
pub mod subscriptions;
pub mod wallet;
