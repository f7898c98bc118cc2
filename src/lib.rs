//! Interoperator admission webhooks
//!
//! This crate bootstraps the admission webhook server of the service-fabrik
//! interoperator: it resolves its settings from the environment, seeds the
//! certificate directory and registers the operator's webhooks.

pub mod config;
pub mod constants;
pub mod error;
pub mod manager;
pub mod webhook;

pub use crate::error::{Error, Result};
pub use crate::manager::{ConnectionConfig, Manager};
