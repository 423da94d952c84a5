//! CRM platform integration: OAuth token lifecycle

pub mod oauth;

pub use oauth::{PlatformClient, PlatformConfig, PlatformToken};
