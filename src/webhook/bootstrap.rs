//! Webhook server bootstrap
//!
//! Run once during operator startup, after every part of the operator has put
//! its builders and handlers into the [`WebhookRegistry`].

use tracing::{info, warn};

use super::builder::Webhook;
use super::certs::seed_cert_dir;
use super::registry::WebhookRegistry;
use super::server::{BootstrapOptions, ServerOptions, WebhookServer};
use crate::config::{self, EnvSource};
use crate::constants::WEBHOOK_SERVER_NAME;
use crate::error::Result;
use crate::manager::Manager;

/// Prepare the webhook server and add it to `manager`.
///
/// Steps run in order and the first error is returned: resolve the Service
/// binding and port, seed the certificate directory, construct the server,
/// build one webhook per registered builder, register them in one batch. An
/// invalid port therefore fails before anything is written to disk. Builders
/// without handlers get an empty handler list.
pub fn add(manager: &mut Manager, registry: &WebhookRegistry, env: &impl EnvSource) -> Result<()> {
    let service = config::service_binding(env);
    if service.is_none() {
        info!("Running outside the cluster, webhook server binds to localhost");
    }

    let port = config::webhook_port(env)?;
    let cert_dir = config::cert_dir(env)?;

    seed_cert_dir(&cert_dir, manager.connection())?;

    let mut server = WebhookServer::new(
        WEBHOOK_SERVER_NAME,
        manager,
        ServerOptions {
            port,
            cert_dir,
            bootstrap: BootstrapOptions {
                service,
                host: None,
            },
            disable_webhook_config_installer: true,
        },
    )?;

    if registry.is_empty() {
        warn!("No webhooks registered, the server will only answer health checks");
    }

    let mut webhooks: Vec<Webhook> = Vec::with_capacity(registry.len());
    for (id, builder) in registry.builders() {
        let handlers = match registry.handlers(id) {
            Some(handlers) => handlers.to_vec(),
            None => {
                warn!(builder = %id, "Can't find handlers for builder");
                Vec::new()
            }
        };

        let webhook = builder
            .clone()
            .handlers(handlers)
            .with_manager(manager)
            .build()?;
        webhooks.push(webhook);
    }

    server.register(webhooks)?;

    info!(
        "Webhook server {} prepared on port {} with {} webhook(s)",
        server.name(),
        port,
        server.webhooks().len()
    );
    manager.add_server(server);
    Ok(())
}
