use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use foldhash::fast::RandomState;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    ClientMessage, ContextGenerator, Error, ErrorKind, Metadata, Response, Router, ServerMessage,
    Subscription, SubscriptionArgs, SubscriptionKey, Value, subscription::SubscriptionController,
};

/// Subscription side of one persistent connection.
///
/// Owns the controllers of the connection, keyed by the client-chosen
/// subscription key, and one context generator shared by all of them.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    router: Arc<Router>,
    metadata: Arc<Metadata>,
    context: ContextGenerator,
    outbound: mpsc::Sender<ServerMessage>,
    controllers: DashMap<SubscriptionKey, Arc<SubscriptionController>, RandomState>,
}

impl Socket {
    /// Starts context generation for the connection right away.
    #[must_use]
    pub fn new(router: Arc<Router>, metadata: Metadata, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let metadata = Arc::new(metadata);
        let context = router.context_manager().generate(metadata.clone());
        Self {
            inner: Arc::new(SocketInner {
                router,
                metadata,
                context,
                outbound,
                controllers: DashMap::default(),
            }),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.inner.metadata
    }

    /// Handles one client frame. Registry changes happen before returning;
    /// resolving a new subscription, or reporting a malformed one, continues
    /// on the returned task.
    pub fn handle_message(&self, text: &str) -> Option<JoinHandle<()>> {
        let Some(msg) = ClientMessage::parse(text) else {
            tracing::debug!("drop malformed subscription message: {text:?}");
            return None;
        };
        match msg {
            ClientMessage::Unsubscribe { key } => {
                self.unsubscribe(key);
                None
            }
            ClientMessage::Subscribe { key, endpoint } => self.subscribe(key, endpoint),
        }
    }

    fn subscribe(&self, key: SubscriptionKey, endpoint: serde_json::Value) -> Option<JoinHandle<()>> {
        let target = parse_endpoint(endpoint);
        let controller = match self.inner.controllers.entry(key) {
            Entry::Occupied(_) => {
                tracing::debug!("subscription {key} already exists");
                return None;
            }
            Entry::Vacant(entry) => match &target {
                Ok(_) => entry
                    .insert(SubscriptionController::new(key, self.inner.outbound.clone()))
                    .clone(),
                Err(err) => {
                    let msg = ServerMessage {
                        subscription_key: key,
                        response: Response::error(err),
                    };
                    let outbound = self.inner.outbound.clone();
                    return Some(tokio::spawn(async move {
                        if outbound.send(msg).await.is_err() {
                            tracing::debug!("connection closed before reporting subscription {key}");
                        }
                    }));
                }
            },
        };
        let (name, params) = target.ok()?;

        let this = self.clone();
        Some(tokio::spawn(async move {
            this.resolve(controller, name, params).await;
        }))
    }

    async fn resolve(&self, controller: Arc<SubscriptionController>, name: String, params: Value) {
        let context = match self.inner.context.get_context().await {
            Ok(context) => context,
            Err(err) => {
                if let Ok(permit) = self.inner.outbound.reserve().await {
                    controller.fail(permit, &err);
                }
                self.destroy_controller(&controller);
                return;
            }
        };

        let Some(endpoint) = self.inner.router.subscription(&name).cloned() else {
            let err = Error::new(ErrorKind::Lookup, "Subscription endpoint not found.");
            if let Ok(permit) = self.inner.outbound.reserve().await {
                controller.fail_endpoint(permit, &name, &err);
            }
            self.destroy_controller(&controller);
            return;
        };

        let result = match crate::types::validate_params(endpoint.params_schema(), &params) {
            Ok(()) => {
                controller.initialize(&name, endpoint.clone());
                let args = SubscriptionArgs {
                    metadata: self.inner.metadata.clone(),
                    params,
                    context,
                    subscription: Subscription::new(controller.clone()),
                };
                endpoint.resolve(args).await
            }
            Err(err) => Err(err),
        };

        // Control frames wait for queue capacity instead of being dropped.
        let Ok(permit) = self.inner.outbound.reserve().await else {
            self.destroy_controller(&controller);
            return;
        };
        match result {
            Ok(()) => {
                if controller.resolve(permit) {
                    tracing::debug!("subscription {} to {name} resolved", controller.key());
                }
            }
            Err(err) => {
                tracing::debug!("subscription {} to {name} failed: {err}", controller.key());
                controller.fail_endpoint(permit, &name, &err);
                self.destroy_controller(&controller);
            }
        }
    }

    /// Unsubscribing an unknown key is a no-op.
    fn unsubscribe(&self, key: SubscriptionKey) {
        let controller = self.inner.controllers.get(&key).map(|c| c.clone());
        if let Some(controller) = controller {
            self.destroy_controller(&controller);
        }
    }

    fn destroy_controller(&self, controller: &Arc<SubscriptionController>) {
        controller.close();
        self.inner
            .controllers
            .remove_if(&controller.key(), |_, c| Arc::ptr_eq(c, controller));
    }

    /// Destroys every controller of the connection.
    pub fn destroy(&self) {
        let controllers: Vec<_> = self
            .inner
            .controllers
            .iter()
            .map(|c| c.value().clone())
            .collect();
        for controller in &controllers {
            self.destroy_controller(controller);
        }
    }

    #[must_use]
    pub fn contains(&self, key: SubscriptionKey) -> bool {
        self.inner.controllers.contains_key(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.controllers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.controllers.is_empty()
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("subscriptions", &self.len())
            .finish_non_exhaustive()
    }
}

/// Splits the `{name: params}` endpoint field of a subscribe message.
fn parse_endpoint(endpoint: serde_json::Value) -> crate::Result<(String, Value)> {
    let serde_json::Value::Object(map) = endpoint else {
        return Err(Error::new(ErrorKind::Protocol, "Endpoint field is not an object."));
    };
    if map.len() != 1 {
        return Err(Error::new(
            ErrorKind::Protocol,
            "Endpoint field must have one element.",
        ));
    }
    map.into_iter()
        .next()
        .map(|(name, params)| (name, params.into()))
        .ok_or_else(|| Error::new(ErrorKind::Protocol, "Endpoint field must have one element."))
}
