use foldhash::fast::RandomState;
use std::{collections::HashMap, sync::Arc};

use crate::{ContextManager, RequestEndpoint, SubscriptionEndpoint};

/// Endpoint registry of a server.
///
/// Filled during setup, then shared read-only with every request and
/// connection. Registering a name twice replaces the earlier endpoint.
#[derive(Default)]
pub struct Router {
    context: ContextManager,
    requests: HashMap<String, Arc<RequestEndpoint>, RandomState>,
    subscriptions: HashMap<String, Arc<SubscriptionEndpoint>, RandomState>,
}

impl Router {
    #[must_use]
    pub fn with_context(mut self, context: ContextManager) -> Self {
        self.context = context;
        self
    }

    pub fn add_request(&mut self, name: impl Into<String>, endpoint: RequestEndpoint) {
        let name = name.into();
        if self.requests.insert(name.clone(), Arc::new(endpoint)).is_some() {
            tracing::warn!("request endpoint {name} registered twice");
        }
    }

    /// Returns the registered endpoint, the handle used to publish to it.
    pub fn add_subscription(
        &mut self,
        name: impl Into<String>,
        endpoint: SubscriptionEndpoint,
    ) -> Arc<SubscriptionEndpoint> {
        let name = name.into();
        let endpoint = Arc::new(endpoint);
        if self
            .subscriptions
            .insert(name.clone(), endpoint.clone())
            .is_some()
        {
            tracing::warn!("subscription endpoint {name} registered twice");
        }
        endpoint
    }

    #[must_use]
    pub fn context_manager(&self) -> &ContextManager {
        &self.context
    }

    #[must_use]
    pub fn request(&self, name: &str) -> Option<&Arc<RequestEndpoint>> {
        self.requests.get(name)
    }

    #[must_use]
    pub fn subscription(&self, name: &str) -> Option<&Arc<SubscriptionEndpoint>> {
        self.subscriptions.get(name)
    }

    pub fn request_names(&self) -> impl Iterator<Item = &String> {
        self.requests.keys()
    }

    pub fn subscription_names(&self) -> impl Iterator<Item = &String> {
        self.subscriptions.keys()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("context", &self.context)
            .field("requests", &self.requests.keys())
            .field("subscriptions", &self.subscriptions.keys())
            .finish()
    }
}
