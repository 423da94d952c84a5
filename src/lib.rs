//! Bridge between a CRM platform's custom payment provider API and the PayTR
//! gateway.
//!
//! The platform starts payments and asks for their state; PayTR settles them
//! and reports back through signed callbacks. Every payment moves through the
//! ledger state machine in [`payments::ledger`], and each transition is
//! applied under a per-payment lock by the store.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;
pub mod platform;
pub mod tenants;

pub use error::{AppError, AppResult};
