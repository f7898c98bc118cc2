//! Webhook registry
//!
//! Initialization code contributes builders and handlers under a shared
//! identifier before the bootstrap reads the registry once. Both maps are
//! ordered, so webhooks are always assembled in lexicographic identifier order.

use std::collections::BTreeMap;

use super::builder::WebhookBuilder;
use super::handler::SharedHandler;

#[derive(Clone, Default)]
pub struct WebhookRegistry {
    builders: BTreeMap<String, WebhookBuilder>,
    handlers: BTreeMap<String, Vec<SharedHandler>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the builder for `id`, returning the one it replaces
    pub fn register_builder(
        &mut self,
        id: impl Into<String>,
        builder: WebhookBuilder,
    ) -> Option<WebhookBuilder> {
        self.builders.insert(id.into(), builder)
    }

    /// Append handlers for `id`; repeated calls keep registration order
    pub fn register_handlers(
        &mut self,
        id: impl Into<String>,
        handlers: impl IntoIterator<Item = SharedHandler>,
    ) {
        self.handlers.entry(id.into()).or_default().extend(handlers);
    }

    /// Builders in lexicographic identifier order
    pub fn builders(&self) -> impl Iterator<Item = (&str, &WebhookBuilder)> {
        self.builders.iter().map(|(id, b)| (id.as_str(), b))
    }

    pub fn handlers(&self, id: &str) -> Option<&[SharedHandler]> {
        self.handlers.get(id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::handler::tests::StubHandler;
    use super::*;

    #[test]
    fn builders_iterate_in_lexicographic_order() {
        let mut registry = WebhookRegistry::new();
        for id in ["sfplan", "sfbinding", "sfserviceinstance"] {
            registry.register_builder(id, WebhookBuilder::new(id).validating());
        }

        let ids: Vec<&str> = registry.builders().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["sfbinding", "sfplan", "sfserviceinstance"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn register_builder_replaces() {
        let mut registry = WebhookRegistry::new();
        assert!(registry
            .register_builder("a", WebhookBuilder::new("first"))
            .is_none());
        let previous = registry.register_builder("a", WebhookBuilder::new("second"));
        assert_eq!(previous.map(|b| b.name().to_string()), Some("first".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn handlers_append() {
        let mut registry = WebhookRegistry::new();
        registry.register_handlers("a", vec![Arc::new(StubHandler::Allow) as SharedHandler]);
        registry.register_handlers("a", vec![Arc::new(StubHandler::Deny("x")) as SharedHandler]);

        assert_eq!(registry.handlers("a").map(<[_]>::len), Some(2));
        assert!(registry.handlers("missing").is_none());
        // Handlers alone do not make a webhook.
        assert!(registry.is_empty());
    }
}
