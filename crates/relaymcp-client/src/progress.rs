//! Progress fan-out
//!
//! Each in-flight call that asked for progress owns an entry keyed by its
//! progress token (the request id). Inbound `notifications/progress` are
//! delivered to that entry's subscribers in subscription order.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use relaymcp_protocol::MessageId;
use relaymcp_protocol::types::ProgressNotification;

use crate::subscribers::{SubscriberRegistry, Subscription};

/// Callback receiving progress updates for one call
pub type ProgressCallback = Arc<dyn Fn(&ProgressNotification) + Send + Sync>;

type ProgressSubscribers = SubscriberRegistry<dyn Fn(&ProgressNotification) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ProgressRouter {
    subscribers: Arc<DashMap<MessageId, Arc<ProgressSubscribers>>>,
}

impl ProgressRouter {
    /// Deliver `callback` every progress update for `token`
    pub(crate) fn subscribe(&self, token: MessageId, callback: ProgressCallback) -> Subscription {
        let registry = Arc::clone(
            self.subscribers
                .entry(token.clone())
                .or_insert_with(SubscriberRegistry::new)
                .value(),
        );
        let inner = registry.subscribe(callback);
        let id = inner.id();

        let subscribers = Arc::downgrade(&self.subscribers);
        Subscription::new(id, move || {
            inner.unsubscribe();
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.remove_if(&token, |_, registry| registry.is_empty());
            }
        })
    }

    /// Route one notification; returns how many subscribers saw it
    pub(crate) fn dispatch(&self, notification: &ProgressNotification) -> usize {
        let registry = self
            .subscribers
            .get(&notification.progress_token)
            .map(|entry| Arc::clone(entry.value()));

        match registry {
            Some(registry) => {
                let count = registry.len();
                registry.emit("progress", |callback| callback(notification));
                count
            }
            None => {
                tracing::debug!(
                    progress_token = %notification.progress_token,
                    "Progress for a request nobody is watching"
                );
                0
            }
        }
    }

    pub(crate) fn tracked_tokens(&self) -> usize {
        self.subscribers.len()
    }
}

impl fmt::Debug for ProgressRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressRouter")
            .field("tracked_tokens", &self.tracked_tokens())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn progress(token: i64, value: f64) -> ProgressNotification {
        ProgressNotification {
            progress_token: MessageId::Number(token),
            progress: value,
            total: Some(100.0),
            message: None,
        }
    }

    #[test]
    fn test_fan_out_in_subscription_order() {
        let router = ProgressRouter::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let _a = router.subscribe(
            MessageId::Number(1),
            Arc::new(move |p: &ProgressNotification| first.lock().push(("a", p.progress))),
        );
        let second = Arc::clone(&seen);
        let _b = router.subscribe(
            MessageId::Number(1),
            Arc::new(move |p: &ProgressNotification| second.lock().push(("b", p.progress))),
        );

        assert_eq!(router.dispatch(&progress(1, 10.0)), 2);
        assert_eq!(router.dispatch(&progress(1, 20.0)), 2);
        assert_eq!(router.dispatch(&progress(2, 30.0)), 0);

        assert_eq!(
            *seen.lock(),
            vec![("a", 10.0), ("b", 10.0), ("a", 20.0), ("b", 20.0)]
        );
    }

    #[test]
    fn test_last_unsubscribe_drops_token() {
        let router = ProgressRouter::default();
        let a = router.subscribe(MessageId::Number(1), Arc::new(|_: &ProgressNotification| {}));
        let b = router.subscribe(MessageId::Number(1), Arc::new(|_: &ProgressNotification| {}));

        a.unsubscribe();
        assert_eq!(router.tracked_tokens(), 1);
        b.unsubscribe();
        assert_eq!(router.tracked_tokens(), 0);
    }
}
