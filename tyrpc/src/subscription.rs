use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use foldhash::fast::RandomState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    EndpointResponse, Error, Response, ServerMessage, SubscriptionEndpoint, SubscriptionKey, Value,
};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct ControllerState {
    endpoint: Option<(String, Arc<SubscriptionEndpoint>)>,
    channel_keys: HashSet<String, RandomState>,
    resolved: bool,
    destroyed: bool,
}

/// Server-side state of one subscription on one connection.
///
/// All transitions happen under one lock, so a publish never observes a
/// half-destroyed controller and nothing is sent after destruction.
///
/// Control frames (the ack and error reports) go through a permit reserved
/// by the caller and are never dropped. Deliveries are best effort.
pub(crate) struct SubscriptionController {
    id: u64,
    key: SubscriptionKey,
    outbound: mpsc::Sender<ServerMessage>,
    state: Mutex<ControllerState>,
    closed: CancellationToken,
}

type Permit<'a> = mpsc::Permit<'a, ServerMessage>;

impl SubscriptionController {
    pub fn new(key: SubscriptionKey, outbound: mpsc::Sender<ServerMessage>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            key,
            outbound,
            state: Mutex::default(),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds the controller to its endpoint once the endpoint is looked up.
    pub fn initialize(&self, name: &str, endpoint: Arc<SubscriptionEndpoint>) {
        let mut state = self.lock();
        if !state.destroyed {
            state.endpoint = Some((name.to_string(), endpoint));
        }
    }

    /// Replaces the channel membership with `keys`.
    pub fn set_channel_keys(self: &Arc<Self>, keys: impl IntoIterator<Item = String>) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        Self::unregister(&mut state, self.id);
        let Some((_, endpoint)) = state.endpoint.clone() else {
            return;
        };
        for key in keys {
            endpoint.channels.add(&key, self);
            state.channel_keys.insert(key);
        }
    }

    pub fn clear_channel_keys(&self) {
        Self::unregister(&mut self.lock(), self.id);
    }

    fn unregister(state: &mut ControllerState, id: u64) {
        if let Some((_, endpoint)) = &state.endpoint {
            for key in state.channel_keys.drain() {
                endpoint.channels.remove(&key, id);
            }
        } else {
            state.channel_keys.clear();
        }
    }

    /// Marks the resolver as finished and acknowledges the subscription
    /// through `permit`. Returns false if the controller was destroyed in the
    /// meantime.
    pub fn resolve(&self, permit: Permit<'_>) -> bool {
        let mut state = self.lock();
        if state.destroyed {
            return false;
        }
        state.resolved = true;
        permit.send(self.message(Response::ack()));
        true
    }

    /// Reports a failure that happened before an endpoint result exists,
    /// e.g. a failed context.
    pub fn fail(&self, permit: Permit<'_>, error: &Error) {
        let state = self.lock();
        if !state.destroyed {
            permit.send(self.message(Response::error(error)));
        }
    }

    /// Reports a failure attributed to the endpoint `name`.
    pub fn fail_endpoint(&self, permit: Permit<'_>, name: &str, error: &Error) {
        let state = self.lock();
        if !state.destroyed {
            permit.send(self.message(Response::single(name, EndpointResponse::err(error))));
        }
    }

    /// Serializes `value` with the endpoint's result type and queues it.
    /// Returns whether a frame was queued.
    pub fn deliver(&self, endpoint: &SubscriptionEndpoint, value: &Value) -> bool {
        let state = self.lock();
        if !state.resolved || state.destroyed {
            return false;
        }
        let Some((name, _)) = &state.endpoint else {
            return false;
        };
        let response = crate::types::serialize_result(endpoint.result_type(), value).into();
        self.send(Response::single(name.clone(), response))
    }

    /// Leaves every channel and stops all further frames. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.destroyed = true;
        Self::unregister(&mut state, self.id);
        self.closed.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.lock().destroyed
    }

    #[cfg(test)]
    pub fn channel_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.lock().channel_keys.iter().cloned().collect();
        keys.sort();
        keys
    }

    fn message(&self, response: Response) -> ServerMessage {
        ServerMessage {
            subscription_key: self.key,
            response,
        }
    }

    fn send(&self, response: Response) -> bool {
        match self.outbound.try_send(self.message(response)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("outbound queue full, drop frame of subscription {}", self.key);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl std::fmt::Debug for SubscriptionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Handle given to a subscription resolver to manage channel membership.
#[derive(Clone, Debug)]
pub struct Subscription {
    controller: Arc<SubscriptionController>,
}

impl Subscription {
    pub(crate) fn new(controller: Arc<SubscriptionController>) -> Self {
        Self { controller }
    }

    /// Sets the channel keys to listen on, replacing any previous set.
    pub fn subscribe<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.controller
            .set_channel_keys(keys.into_iter().map(Into::into));
    }

    /// Listens on a single channel key, replacing any previous set.
    pub fn subscribe_one(&self, key: impl Into<String>) {
        self.subscribe([key]);
    }

    /// Leaves all channels. The subscription itself stays open.
    pub fn unsubscribe(&self) {
        self.controller.clear_channel_keys();
    }

    /// False once the client unsubscribed or disconnected.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.controller.is_active()
    }

    /// Completes once the client unsubscribed or disconnected. Resolvers use
    /// it to release resources tied to the subscription.
    pub async fn closed(&self) {
        self.controller.closed.cancelled().await;
    }

    #[must_use]
    pub fn key(&self) -> SubscriptionKey {
        self.controller.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Type;
    use serde_json::json;

    fn permit(tx: &mpsc::Sender<ServerMessage>) -> Permit<'_> {
        tx.try_reserve().unwrap()
    }

    fn endpoint() -> Arc<SubscriptionEndpoint> {
        Arc::new(SubscriptionEndpoint::new(|_| async { Ok(()) }).result(Type::string()))
    }

    #[test]
    fn test_replace_channel_keys() {
        let (tx, _rx) = mpsc::channel(8);
        let endpoint = endpoint();
        let controller = SubscriptionController::new(1, tx);
        controller.initialize("chat", endpoint.clone());

        let subscription = Subscription::new(controller.clone());
        subscription.subscribe(["a", "b"]);
        assert_eq!(controller.channel_keys(), ["a", "b"]);
        subscription.subscribe(["b", "c"]);
        assert_eq!(controller.channel_keys(), ["b", "c"]);
        assert_eq!(endpoint.listener_count("a"), 0);
        assert_eq!(endpoint.listener_count("c"), 1);

        subscription.unsubscribe();
        assert!(controller.channel_keys().is_empty());
        assert_eq!(endpoint.listener_count("b"), 0);
        assert!(subscription.is_active());
    }

    #[test]
    fn test_deliver_after_resolve() {
        let (tx, mut rx) = mpsc::channel(8);
        let endpoint = endpoint();
        let controller = SubscriptionController::new(5, tx.clone());
        controller.initialize("chat", endpoint.clone());
        Subscription::new(controller.clone()).subscribe_one("room");

        // not acknowledged yet: publishes are dropped
        assert_eq!(endpoint.publish("room", "early"), 0);
        assert!(rx.try_recv().is_err());

        assert!(controller.resolve(permit(&tx)));
        let ack = rx.try_recv().unwrap();
        assert_eq!(ack.subscription_key, 5);
        assert_eq!(ack.response, Response::ack());

        assert_eq!(endpoint.publish("room", "hi"), 1);
        assert_eq!(endpoint.publish("other", "hi"), 0);
        let frame = rx.try_recv().unwrap();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "subscriptionKey": 5,
                "response": {"result": {"chat": {"result": "hi", "error": null}}, "error": null}
            })
        );

        // each delivery is serialized separately; failures reach the client
        assert_eq!(endpoint.publish("room", 1i64), 1);
        let frame = rx.try_recv().unwrap();
        let result = frame.response.result.unwrap();
        assert_eq!(result["chat"].error.as_ref().unwrap().message, "Invalid result value.");
    }

    #[tokio::test]
    async fn test_close() {
        let (tx, mut rx) = mpsc::channel(8);
        let endpoint = endpoint();
        let controller = SubscriptionController::new(1, tx.clone());
        controller.initialize("chat", endpoint.clone());
        let subscription = Subscription::new(controller.clone());
        subscription.subscribe(["room"]);

        controller.close();
        controller.close();
        assert!(!subscription.is_active());
        subscription.closed().await;
        assert_eq!(endpoint.listener_count("room"), 0);
        assert!(!controller.resolve(permit(&tx)));

        // a late resolver cannot rejoin channels
        subscription.subscribe(["room"]);
        assert_eq!(endpoint.listener_count("room"), 0);
        controller.fail(permit(&tx), &Error::msg("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_frames() {
        let (tx, mut rx) = mpsc::channel(1);
        let endpoint = endpoint();
        let controller = SubscriptionController::new(1, tx.clone());
        controller.initialize("chat", endpoint.clone());
        Subscription::new(controller.clone()).subscribe(["room"]);
        assert!(controller.resolve(permit(&tx)));

        assert_eq!(endpoint.publish("room", "dropped"), 0);
        assert_eq!(rx.try_recv().unwrap().response, Response::ack());
        assert_eq!(endpoint.publish("room", "kept"), 1);
    }

    #[test]
    fn test_ack_precedes_deliveries_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let endpoint = endpoint();
        let controller = SubscriptionController::new(1, tx.clone());
        controller.initialize("chat", endpoint.clone());
        Subscription::new(controller.clone()).subscribe_one("room");

        // another subscription occupies the queue; the ack waits for room
        tx.try_send(ServerMessage {
            subscription_key: 2,
            response: Response::ack(),
        })
        .unwrap();
        assert!(tx.try_reserve().is_err());
        assert_eq!(endpoint.publish("room", "early"), 0);

        assert_eq!(rx.try_recv().unwrap().subscription_key, 2);
        assert!(controller.resolve(permit(&tx)));
        assert_eq!(endpoint.publish("room", "dropped"), 0);

        let ack = rx.try_recv().unwrap();
        assert_eq!((ack.subscription_key, ack.response), (1, Response::ack()));
        assert_eq!(endpoint.publish("room", "hi"), 1);
        assert!(rx.try_recv().unwrap().response.result.is_some());
    }
}
