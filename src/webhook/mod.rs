//! Webhook Module
//!
//! Admission webhook plumbing for the interoperator: builders and handlers are
//! collected in a [`WebhookRegistry`], and [`bootstrap::add`] turns them into a
//! TLS-serving [`WebhookServer`] owned by the manager.
//!
//! # Example
//!
//! ```rust,ignore
//! use interoperator_webhook::config::ProcessEnv;
//! use interoperator_webhook::webhook::{bootstrap, WebhookBuilder, WebhookRegistry};
//!
//! let mut registry = WebhookRegistry::new();
//! registry.register_builder(
//!     "sfserviceinstance",
//!     WebhookBuilder::new("sfserviceinstance")
//!         .validating()
//!         .for_resource("osb.servicefabrik.io", "v1alpha1", "sfserviceinstances"),
//! );
//! registry.register_handlers("sfserviceinstance", vec![Arc::new(MyHandler) as SharedHandler]);
//!
//! bootstrap::add(&mut manager, &registry, &ProcessEnv)?;
//! manager.start().await?;
//! ```

pub mod bootstrap;
pub mod builder;
pub mod certs;
pub mod handler;
pub mod registry;
pub mod server;

pub use builder::{FailurePolicy, ResourceRule, Webhook, WebhookBuilder, WebhookKind};
pub use certs::{seed_cert_dir, SeededCerts};
pub use handler::{AdmissionHandler, SharedHandler, WebhookContext};
pub use registry::WebhookRegistry;
pub use server::{BootstrapOptions, ServerOptions, WebhookServer};
