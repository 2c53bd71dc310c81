//! In-memory push session.

use cw_types::{PubSubResult, PushSession, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct SessionState {
    active: HashMap<SubscriptionId, String>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    next_id: usize,
}

/// Push session that tracks open subscriptions.
#[derive(Debug, Default)]
pub struct MockPushSession {
    state: Mutex<SessionState>,
}

impl MockPushSession {
    /// Destinations with an open subscription.
    pub fn active_destinations(&self) -> Vec<String> {
        let mut destinations: Vec<_> = self.state.lock().active.values().cloned().collect();
        destinations.sort();
        destinations
    }

    /// Subscription id open on `destination`, if any.
    pub fn subscription_for(&self, destination: &str) -> Option<SubscriptionId> {
        self.state
            .lock()
            .active
            .iter()
            .find(|(_, dest)| dest.as_str() == destination)
            .map(|(id, _)| id.clone())
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribe_calls
    }
}

impl PushSession for MockPushSession {
    fn subscribe(&self, destination: &str) -> PubSubResult<SubscriptionId> {
        let mut state = self.state.lock();
        state.subscribe_calls += 1;
        state.next_id += 1;
        let id = SubscriptionId(format!("sub-{}", state.next_id));
        state.active.insert(id.clone(), destination.to_string());
        Ok(id)
    }

    fn unsubscribe(&self, subscription: &SubscriptionId) -> PubSubResult<()> {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        state.active.remove(subscription);
        Ok(())
    }
}
