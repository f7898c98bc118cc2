//! Webhook builder
//!
//! Other parts of the operator describe their webhooks with a
//! [`WebhookBuilder`] and put it into the registry. The bootstrap attaches the
//! handler list and the manager before calling [`WebhookBuilder::build`].

use std::fmt;

use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::Client;
use tracing::{debug, warn};

use super::handler::{evaluate, SharedHandler, WebhookContext};
use crate::error::{Error, Result};
use crate::manager::Manager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookKind {
    Mutating,
    Validating,
}

impl WebhookKind {
    fn path_prefix(self) -> &'static str {
        match self {
            WebhookKind::Mutating => "mutating",
            WebhookKind::Validating => "validating",
        }
    }
}

/// How the API server treats calls that fail
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    Fail,
    Ignore,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Fail => "Fail",
            FailurePolicy::Ignore => "Ignore",
        }
    }
}

/// Resources a webhook is invoked for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRule {
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
}

#[derive(Clone, Default)]
pub struct WebhookBuilder {
    name: String,
    kind: Option<WebhookKind>,
    path: Option<String>,
    operations: Vec<Operation>,
    rules: Vec<ResourceRule>,
    failure_policy: FailurePolicy,
    handlers: Vec<SharedHandler>,
    manager_attached: bool,
    client: Option<Client>,
}

impl WebhookBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn mutating(mut self) -> Self {
        self.kind = Some(WebhookKind::Mutating);
        self
    }

    pub fn validating(mut self) -> Self {
        self.kind = Some(WebhookKind::Validating);
        self
    }

    /// Serving path; defaults to `/<mutating|validating>-<name>`
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations = operations.into_iter().collect();
        self
    }

    pub fn for_resource(
        mut self,
        api_group: impl Into<String>,
        api_version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        self.rules.push(ResourceRule {
            api_group: api_group.into(),
            api_version: api_version.into(),
            resource: resource.into(),
        });
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Replace the handler list
    pub fn handlers(mut self, handlers: impl IntoIterator<Item = SharedHandler>) -> Self {
        self.handlers = handlers.into_iter().collect();
        self
    }

    /// Attach the manager whose client handlers receive
    pub fn with_manager(mut self, manager: &Manager) -> Self {
        self.client = manager.client().cloned();
        self.manager_attached = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(self) -> Result<Webhook> {
        let fail = |reason: &str| Error::WebhookBuild {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(fail("webhook name must not be empty"));
        }
        let kind = self
            .kind
            .ok_or_else(|| fail("webhook must be either mutating or validating"))?;
        if !self.manager_attached {
            return Err(fail("manager must be set before building"));
        }

        let path = match self.path {
            Some(path) if path.starts_with('/') => path,
            Some(path) => return Err(fail(&format!("path {path:?} must start with '/'"))),
            None => format!("/{}-{}", kind.path_prefix(), self.name),
        };
        if let Some(reason) = unroutable(&path) {
            return Err(fail(&format!("path {path:?} {reason}")));
        }

        let operations = if self.operations.is_empty() {
            vec![Operation::Create, Operation::Update]
        } else {
            self.operations
        };

        debug!(
            webhook = %self.name,
            path = %path,
            handlers = self.handlers.len(),
            "Built webhook"
        );

        Ok(Webhook {
            context: WebhookContext {
                webhook: self.name.clone(),
                client: self.client,
            },
            name: self.name,
            kind,
            path,
            operations,
            rules: self.rules,
            failure_policy: self.failure_policy,
            handlers: self.handlers,
        })
    }
}

/// Why `path` cannot be served as a literal route, if it cannot
fn unroutable(path: &str) -> Option<&'static str> {
    if path.contains(['{', '}']) {
        return Some("must not contain '{' or '}'");
    }
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Some("must not have segments starting with ':' or '*'");
    }
    None
}

/// A built webhook, ready for registration with a server
pub struct Webhook {
    name: String,
    kind: WebhookKind,
    path: String,
    operations: Vec<Operation>,
    rules: Vec<ResourceRule>,
    failure_policy: FailurePolicy,
    handlers: Vec<SharedHandler>,
    context: WebhookContext,
}

impl fmt::Debug for Webhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Webhook")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl Webhook {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> WebhookKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn rules(&self) -> &[ResourceRule] {
        &self.rules
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }

    /// Answer an admission review with this webhook's handler chain
    pub async fn review(
        &self,
        review: AdmissionReview<DynamicObject>,
    ) -> AdmissionReview<DynamicObject> {
        let req: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(req) => req,
            Err(e) => {
                warn!(webhook = %self.name, "Failed to parse admission request: {}", e);
                return AdmissionResponse::invalid(format!("Invalid admission request: {e}"))
                    .into_review();
            }
        };

        let response = evaluate(self.kind, &self.handlers, &self.context, &req).await;
        debug!(
            webhook = %self.name,
            uid = %req.uid,
            allowed = response.allowed,
            "Admission request handled"
        );
        response.into_review()
    }
}
