//! Payment provider implementations
//!
//! Concrete implementations of the PaymentProvider trait for each gateway.

pub mod paytr;

pub use paytr::{PaytrConfig, PaytrProvider};
