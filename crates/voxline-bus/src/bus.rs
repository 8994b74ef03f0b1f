//! Topic-keyed subscriber table and sequential dispatch.

use crate::error::{BusError, HandlerError, HandlerFailure};
use crate::handler::EventHandler;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use voxline_types::{Event, Topic};

type SubscriberMap = HashMap<Topic, Vec<Arc<dyn EventHandler>>>;

/// In-process publish/subscribe dispatcher.
///
/// Cloning the bus is cheap and every clone shares one subscriber table.
///
/// The table sits behind a `std::sync::RwLock` on purpose: it is only held
/// for brief vector operations and never across an `.await`. `publish`
/// copies the handler list out before invoking anything, so handlers may
/// subscribe or unsubscribe freely while being called.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`. Delivery order is registration order.
    ///
    /// Registering the same handler (by `Arc` identity) twice on one topic is
    /// rejected with [`BusError::AlreadySubscribed`] and leaves the table
    /// unchanged.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> Result<(), BusError> {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let handlers = subscribers.entry(topic).or_default();

        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return Err(BusError::AlreadySubscribed {
                topic,
                handler: handler.name().to_string(),
            });
        }

        tracing::debug!(topic = %topic, handler = handler.name(), "subscribed");
        handlers.push(handler);
        Ok(())
    }

    /// Removes `handler` from `topic`.
    ///
    /// Returns `false` if it was not registered; that is not an error.
    pub fn unsubscribe(&self, topic: Topic, handler: &Arc<dyn EventHandler>) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = subscribers.get_mut(&topic) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            subscribers.remove(&topic);
        }

        if removed {
            tracing::debug!(topic = %topic, handler = handler.name(), "unsubscribed");
        }
        removed
    }

    /// Number of handlers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler registered for `topic`.
    ///
    /// Handlers run one after another in registration order, each awaited
    /// before the next starts. A failing (or panicking) handler does not stop
    /// delivery; all failures are returned together once every handler ran.
    ///
    /// # Errors
    ///
    /// - [`BusError::TopicMismatch`] if `event` does not belong to `topic`
    ///   (nothing is delivered).
    /// - [`BusError::HandlerFailures`] if at least one handler failed.
    pub async fn publish(&self, topic: Topic, event: Event) -> Result<(), BusError> {
        let actual = event.topic();
        if actual != topic {
            return Err(BusError::TopicMismatch {
                expected: topic,
                actual,
            });
        }

        let handlers = self.snapshot(topic);
        if handlers.is_empty() {
            tracing::trace!(topic = %topic, "no subscribers");
            return Ok(());
        }

        let mut failures = Vec::new();
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(&event))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HandlerError::new("handler panicked")));

            if let Err(error) = outcome {
                tracing::warn!(
                    topic = %topic,
                    handler = handler.name(),
                    client_id = %event.client_id(),
                    "event handler failed: {}",
                    error
                );
                failures.push(HandlerFailure {
                    handler: handler.name().to_string(),
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BusError::HandlerFailures { topic, failures })
        }
    }

    fn snapshot(&self, topic: Topic) -> Vec<Arc<dyn EventHandler>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for (topic, handlers) in subscribers.iter() {
            map.entry(&topic.as_str(), &handlers.len());
        }
        map.finish()
    }
}
