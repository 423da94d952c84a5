//! Payment lifecycle
//!
//! Gateway-agnostic ledger and orchestration, with gateway adapters behind
//! the [`traits::PaymentProvider`] capability set.

pub mod hash;
pub mod ledger;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod traits;
pub mod types;
