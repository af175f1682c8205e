use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use foldhash::fast::RandomState;

use crate::subscription::SubscriptionController;

type Listeners = HashMap<u64, Weak<SubscriptionController>, RandomState>;

/// Channel key to subscribed controllers, owned by one subscription endpoint.
///
/// Entries are weak: a controller's lifetime is governed by its connection,
/// and it removes its own entries when destroyed.
#[derive(Default)]
pub(crate) struct Channels {
    listeners: DashMap<String, Listeners, RandomState>,
}

impl Channels {
    pub fn add(&self, channel_key: &str, controller: &Arc<SubscriptionController>) {
        self.listeners
            .entry(channel_key.to_string())
            .or_default()
            .insert(controller.id(), Arc::downgrade(controller));
    }

    pub fn remove(&self, channel_key: &str, controller_id: u64) {
        self.listeners.remove_if_mut(channel_key, |_, listeners| {
            listeners.remove(&controller_id);
            listeners.is_empty()
        });
    }

    /// Snapshot of the live listeners of `channel_key`.
    pub fn listeners(&self, channel_key: &str) -> Vec<Arc<SubscriptionController>> {
        self.listeners
            .get(channel_key)
            .map(|listeners| listeners.values().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, channel_key: &str) -> usize {
        self.listeners.get(channel_key).map_or(0, |l| l.len())
    }
}
