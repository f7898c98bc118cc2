//! Admission handlers
//!
//! Handlers hold the admission decision logic and are supplied by the parts of
//! the operator that own a resource. A webhook runs its handler list in order.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use kube::core::DynamicObject;
use kube::Client;
use tracing::warn;

use super::builder::WebhookKind;

/// Per-webhook data handed to every handler invocation
#[derive(Clone)]
pub struct WebhookContext {
    /// Name of the webhook the request arrived on
    pub webhook: String,

    /// Kubernetes client of the manager the webhook was built with
    pub client: Option<Client>,
}

/// A single admission decision step
#[async_trait]
pub trait AdmissionHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &WebhookContext,
        req: &AdmissionRequest<DynamicObject>,
    ) -> AdmissionResponse;
}

pub type SharedHandler = Arc<dyn AdmissionHandler>;

/// Run `handlers` in order and fold their responses into one.
///
/// The first denial is returned as-is. Warnings of allowing handlers are
/// collected. For mutating webhooks the JSON patches of all handlers are
/// concatenated in handler order; validating webhooks never return a patch.
/// An empty handler list allows the request.
pub async fn evaluate(
    kind: WebhookKind,
    handlers: &[SharedHandler],
    ctx: &WebhookContext,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let mut patched: Option<AdmissionResponse> = None;
    let mut operations: Vec<serde_json::Value> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for handler in handlers {
        let response = handler.handle(ctx, req).await;
        if !response.allowed {
            return response;
        }
        warnings.extend(response.warnings.iter().flatten().cloned());

        if kind != WebhookKind::Mutating {
            continue;
        }
        if let Some(patch) = &response.patch {
            match serde_json::from_slice::<Vec<serde_json::Value>>(patch) {
                Ok(ops) => operations.extend(ops),
                Err(e) => {
                    warn!(webhook = %ctx.webhook, "Handler returned an invalid JSON patch: {}", e);
                    return AdmissionResponse::from(req)
                        .deny(format!("Handler returned an invalid JSON patch: {e}"));
                }
            }
            if patched.is_none() {
                patched = Some(response);
            }
        }
    }

    let mut response = match patched {
        Some(mut response) => match serde_json::to_vec(&operations) {
            Ok(bytes) => {
                response.patch = Some(bytes);
                response
            }
            Err(e) => {
                return AdmissionResponse::from(req)
                    .deny(format!("Failed to serialize patch: {e}"))
            }
        },
        None => AdmissionResponse::from(req),
    };
    response.warnings = if warnings.is_empty() {
        None
    } else {
        Some(warnings)
    };
    response
}
