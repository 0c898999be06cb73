//! Wires server pushes into the query cache.
//!
//! One handler per known topic turns each event into an
//! [`InvalidationPlan`], applies it through a [`CacheConsumer`] and forwards
//! any system notices. Registration is explicit: nothing listens until
//! [`RealtimeSync::start`] is called, and [`RealtimeSync::stop`] (or drop)
//! removes every handler again.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::application::notifications::NotificationCenter;
use crate::cache::{CacheConsumer, InvalidationPlan, QueryCache, ServerEvent, Topic, mutex_lock};

use super::router::{EventRouter, Unsubscribe};

const SOURCE: &str = "realtime::sync";

pub struct RealtimeSync {
    router: EventRouter,
    consumer: Arc<CacheConsumer>,
    notifications: NotificationCenter,
    registrations: Mutex<Vec<Unsubscribe>>,
}

impl RealtimeSync {
    pub fn new(router: EventRouter, cache: QueryCache, notifications: NotificationCenter) -> Self {
        Self {
            router,
            consumer: Arc::new(CacheConsumer::new(cache)),
            notifications,
            registrations: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        self.consumer.cache()
    }

    /// Subscribe to every known topic. Returns the number of handlers
    /// registered; zero when already active.
    pub fn start(&self) -> usize {
        let mut registrations = mutex_lock(&self.registrations, SOURCE, "start");
        if !registrations.is_empty() {
            debug!("Realtime sync already active");
            return 0;
        }

        for topic in Topic::KNOWN {
            let consumer = Arc::clone(&self.consumer);
            let notifications = self.notifications.clone();
            let handle = self.router.subscribe(topic, move |event| {
                apply_event(&consumer, &notifications, event);
            });
            registrations.push(handle);
        }

        info!(topics = registrations.len(), "Realtime sync started");
        registrations.len()
    }

    /// Remove every handler registered by [`start`](Self::start).
    pub fn stop(&self) -> usize {
        let registrations =
            std::mem::take(&mut *mutex_lock(&self.registrations, SOURCE, "stop"));
        let removed = registrations
            .iter()
            .filter(|registration| registration.unsubscribe())
            .count();
        if removed > 0 {
            info!(removed, "Realtime sync stopped");
        }
        removed
    }

    pub fn is_active(&self) -> bool {
        !mutex_lock(&self.registrations, SOURCE, "is_active").is_empty()
    }
}

impl Drop for RealtimeSync {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_event(consumer: &CacheConsumer, notifications: &NotificationCenter, event: &ServerEvent) {
    let plan = InvalidationPlan::for_event(event);
    if plan.is_empty() {
        debug!(topic = %event.topic(), "Event required no cache changes");
        return;
    }
    consumer.apply(&plan);
    for notice in plan.notices() {
        notifications.system(notice);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::notifications::NotificationKind;
    use crate::cache::QueryKey;

    fn setup() -> (EventRouter, QueryCache, NotificationCenter, RealtimeSync) {
        let router = EventRouter::new();
        let cache = QueryCache::new();
        let notifications = NotificationCenter::new();
        let sync = RealtimeSync::new(router.clone(), cache.clone(), notifications.clone());
        (router, cache, notifications, sync)
    }

    #[test]
    fn start_registers_each_topic_once() {
        let (router, _, _, sync) = setup();

        assert_eq!(sync.start(), Topic::KNOWN.len());
        assert_eq!(sync.start(), 0);
        assert!(sync.is_active());
        for topic in Topic::KNOWN {
            assert_eq!(router.handler_count(&topic), 1);
        }
    }

    #[test]
    fn stop_removes_handlers_and_is_repeatable() {
        let (router, _, _, sync) = setup();
        sync.start();

        assert_eq!(sync.stop(), Topic::KNOWN.len());
        assert_eq!(sync.stop(), 0);
        assert!(!sync.is_active());
        assert_eq!(router.handler_count(&Topic::Series), 0);
    }

    #[test]
    fn series_event_invalidates_through_router() {
        let (router, cache, _, sync) = setup();
        let key = QueryKey::from(["/api/series", "s1"]);
        cache.set_value(key.clone(), json!({"id": "s1"}));
        sync.start();

        let event = ServerEvent::from_parts("series", json!({"seriesId": "s1", "action": "updated"}));
        router.dispatch(&event);

        assert!(cache.is_stale(&key));
        assert!(cache.contains(&key));
    }

    #[test]
    fn nothing_happens_before_start() {
        let (router, cache, _, _sync) = setup();
        let key = QueryKey::from(["/api/series", "s1"]);
        cache.set_value(key.clone(), json!({}));

        router.dispatch(&ServerEvent::from_parts("series", json!({"seriesId": "s1"})));

        assert!(!cache.is_stale(&key));
    }

    #[test]
    fn system_events_reach_notifications() {
        let (router, cache, notifications, sync) = setup();
        cache.set_value(QueryKey::from(["/api/wallet"]), json!({}));
        sync.start();

        router.dispatch(&ServerEvent::from_parts(
            "system",
            json!({"type": "maintenance", "message": "Back soon"}),
        ));

        assert!(cache.is_stale(&QueryKey::from(["/api/wallet"])));
        let notices = notifications.drain(10);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NotificationKind::System);
        assert_eq!(notices[0].description, "Back soon");
    }

    #[test]
    fn drop_unsubscribes() {
        let (router, _, _, sync) = setup();
        sync.start();
        drop(sync);
        assert_eq!(router.handler_count(&Topic::Ad), 0);
    }
}
