//! Provider abstraction: one client per payment network behind `PaymentProvider`.

pub mod auth;
pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::{PaymentFactoryConfig, PaymentProviderFactory, ProviderRegistry};
pub use provider::PaymentProvider;
pub use types::*;
