//! Mobile-money payment backend for Cameroon (XAF): MTN Mobile Money,
//! Orange Money and cash on delivery behind one orchestrator, with rule-based
//! fraud screening, signed provider callbacks and USSD authorization sessions.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod fraud;
pub mod health;
pub mod helpers;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
