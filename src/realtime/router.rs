//! Topic-based event router.
//!
//! Handlers register per topic and run synchronously, in registration order,
//! for every event carrying that topic. The handler list is snapshotted
//! before dispatch so handlers may subscribe or unsubscribe re-entrantly.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use metrics::counter;
use tracing::{debug, warn};

use crate::cache::{ServerEvent, Topic, mutex_lock};

const SOURCE: &str = "realtime::router";
const METRIC_REALTIME_EVENTS: &str = "mangasync_realtime_events_total";

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Registration {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<Topic, Vec<Registration>>>,
    next_id: AtomicU64,
}

/// Cloneable handle to a set of topic subscriptions.
#[derive(Clone, Default)]
pub struct EventRouter {
    inner: Arc<Inner>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Unsubscribe
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        mutex_lock(&self.inner.topics, SOURCE, "subscribe")
            .entry(topic.clone())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        debug!(topic = %topic, registration = id, "Handler subscribed");

        Unsubscribe {
            router: Arc::downgrade(&self.inner),
            topic,
            id,
            done: AtomicBool::new(false),
        }
    }

    /// Run every handler registered for the event's topic.
    ///
    /// Returns the number of handlers invoked. A panicking handler is logged
    /// and does not stop the remaining handlers.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let topic = event.topic();
        counter!(METRIC_REALTIME_EVENTS, "topic" => topic.as_str().to_string()).increment(1);

        let handlers: Vec<Handler> = mutex_lock(&self.inner.topics, SOURCE, "dispatch")
            .get(&topic)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|registration| Arc::clone(&registration.handler))
                    .collect()
            })
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(topic = %topic, "No handlers for event");
            return 0;
        }

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(topic = %topic, "Event handler panicked");
            }
        }
        handlers.len()
    }

    pub fn handler_count(&self, topic: &Topic) -> usize {
        mutex_lock(&self.inner.topics, SOURCE, "handler_count")
            .get(topic)
            .map_or(0, Vec::len)
    }
}

/// Removes one registration from the router it came from.
///
/// Dropping this value leaves the registration in place.
pub struct Unsubscribe {
    router: Weak<Inner>,
    topic: Topic,
    id: u64,
    done: AtomicBool,
}

impl Unsubscribe {
    /// Remove the registration. Returns `true` only on the call that removed it.
    pub fn unsubscribe(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(inner) = self.router.upgrade() else {
            return false;
        };

        let mut topics = mutex_lock(&inner.topics, SOURCE, "unsubscribe");
        let Some(registrations) = topics.get_mut(&self.topic) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|registration| registration.id != self.id);
        let removed = registrations.len() < before;
        if registrations.is_empty() {
            topics.remove(&self.topic);
        }
        removed
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn series_event() -> ServerEvent {
        ServerEvent::from_parts("series", json!({"seriesId": "s1"}))
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let router = EventRouter::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&calls);
        let _a = router.subscribe(Topic::Series, move |_| first.lock().expect("calls").push("a"));
        let second = Arc::clone(&calls);
        let _b = router.subscribe(Topic::Series, move |_| second.lock().expect("calls").push("b"));

        assert_eq!(router.dispatch(&series_event()), 2);
        assert_eq!(*calls.lock().expect("calls"), vec!["a", "b"]);
    }

    #[test]
    fn other_topics_are_not_invoked() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let _sub = router.subscribe(Topic::Chapter, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(router.dispatch(&series_event()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_twice_is_harmless() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&hits);
        let first = router.subscribe(Topic::Series, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&hits);
        let _second = router.subscribe(Topic::Series, move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert_eq!(router.handler_count(&Topic::Series), 1);

        router.dispatch(&series_event());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn dropping_handle_keeps_registration() {
        let router = EventRouter::new();
        drop(router.subscribe(Topic::Series, |_| {}));
        assert_eq!(router.handler_count(&Topic::Series), 1);
    }

    #[test]
    fn unsubscribe_after_router_dropped() {
        let router = EventRouter::new();
        let sub = router.subscribe(Topic::Series, |_| {});
        drop(router);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let router = EventRouter::new();
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

        let inner_slot = Arc::clone(&slot);
        let sub = router.subscribe(Topic::Series, move |_| {
            if let Some(sub) = inner_slot.lock().expect("slot").as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().expect("slot") = Some(sub);

        assert_eq!(router.dispatch(&series_event()), 1);
        assert_eq!(router.handler_count(&Topic::Series), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicU64::new(0));

        let _bad = router.subscribe(Topic::Series, |_| panic!("handler failure"));
        let counter = Arc::clone(&hits);
        let _good = router.subscribe(Topic::Series, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(router.dispatch(&series_event()), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_topics_can_be_subscribed() {
        let router = EventRouter::new();
        let _sub = router.subscribe(Topic::from("poll"), |_| {});
        let event = ServerEvent::from_parts("poll", json!({}));
        assert_eq!(router.dispatch(&event), 1);
    }
}
