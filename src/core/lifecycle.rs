//! Lifecycle events and the in-process bus they travel on.
//!
//! The bus is a plain named-event multicast: `publish` synchronously calls
//! every handler currently subscribed to the event's topic. Nothing is
//! retained for late subscribers. Each handler runs in isolation, so an error
//! or panic in one subscriber is logged and the others still run.
//!
//! A bus is an ordinary value. The gateway server and every schema resolver
//! receive the same `Arc<LifecycleBus>` at construction; tests build a fresh
//! one per case.
use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, RwLock},
};

use eyre::Result;
use serde::{Deserialize, Serialize};

/// Topic prefix shared by every lifecycle event.
pub const TOPIC_PREFIX: &str = "ceres.server";

/// Milestones in server startup and remote schema resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEvent {
    ConnectorsReady,
    MiddlewareReady,
    #[serde(rename = "SERVER_STARTED")]
    Started,
    #[serde(rename = "SERVER_STOPPED")]
    Stopped,
    RemoteSchemasFetching,
    RemoteSchemasFetched,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 6] = [
        LifecycleEvent::ConnectorsReady,
        LifecycleEvent::MiddlewareReady,
        LifecycleEvent::Started,
        LifecycleEvent::Stopped,
        LifecycleEvent::RemoteSchemasFetching,
        LifecycleEvent::RemoteSchemasFetched,
    ];

    /// The topic suffix, e.g. `SERVER_STARTED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::ConnectorsReady => "CONNECTORS_READY",
            LifecycleEvent::MiddlewareReady => "MIDDLEWARE_READY",
            LifecycleEvent::Started => "SERVER_STARTED",
            LifecycleEvent::Stopped => "SERVER_STOPPED",
            LifecycleEvent::RemoteSchemasFetching => "REMOTE_SCHEMAS_FETCHING",
            LifecycleEvent::RemoteSchemasFetched => "REMOTE_SCHEMAS_FETCHED",
        }
    }

    /// Fully qualified bus topic.
    pub fn topic(&self) -> String {
        format!("{TOPIC_PREFIX}.{}", self.as_str())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered with every publication.
#[derive(Debug, Clone)]
pub struct LifecycleMessage {
    pub event: LifecycleEvent,
    /// Identifies the publishing component (server id or resolver id).
    pub source: String,
    /// Listening address of the publishing server, when known.
    pub local_addr: Option<SocketAddr>,
}

impl LifecycleMessage {
    pub fn new(event: LifecycleEvent, source: impl Into<String>) -> Self {
        Self {
            event,
            source: source.into(),
            local_addr: None,
        }
    }

    pub fn with_local_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.local_addr = addr;
        self
    }
}

type Handler = Arc<dyn Fn(&LifecycleMessage) -> Result<()> + Send + Sync>;

/// In-process publish/subscribe channel keyed by topic string.
#[derive(Default)]
pub struct LifecycleBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every future publication of `event`.
    pub fn subscribe<F>(&self, event: LifecycleEvent, handler: F)
    where
        F: Fn(&LifecycleMessage) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers
            .entry(event.topic())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Deliver `message` to every subscriber of its event. Returns the number
    /// of handlers that completed without error.
    pub fn publish(&self, message: LifecycleMessage) -> usize {
        let topic = message.event.topic();
        // Snapshot so handlers may subscribe or publish without deadlocking.
        let subscribers: Vec<Handler> = {
            let handlers = match self.handlers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            handlers.get(&topic).cloned().unwrap_or_default()
        };

        tracing::debug!(
            topic = %topic,
            source = %message.source,
            subscribers = subscribers.len(),
            "Publishing lifecycle event"
        );

        let mut delivered = 0;
        for handler in subscribers {
            match catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!(topic = %topic, "Lifecycle handler failed: {e:?}");
                }
                Err(_) => {
                    tracing::error!(topic = %topic, "Lifecycle handler panicked");
                }
            }
        }
        delivered
    }

    /// Number of handlers subscribed to `event`.
    pub fn subscriber_count(&self, event: LifecycleEvent) -> usize {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.get(&event.topic()).map_or(0, Vec::len)
    }
}

impl fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = match self.handlers.read() {
            Ok(guard) => guard.keys().cloned().collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("LifecycleBus")
            .field("topics", &topics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(
            LifecycleEvent::Started.topic(),
            "ceres.server.SERVER_STARTED"
        );
        assert_eq!(
            LifecycleEvent::RemoteSchemasFetched.to_string(),
            "REMOTE_SCHEMAS_FETCHED"
        );
    }

    #[test]
    fn test_publish_reaches_only_matching_subscribers() {
        let bus = LifecycleBus::new();
        let ready = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));

        let ready_count = ready.clone();
        bus.subscribe(LifecycleEvent::MiddlewareReady, move |_| {
            ready_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let stopped_count = stopped.clone();
        bus.subscribe(LifecycleEvent::Stopped, move |_| {
            stopped_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(LifecycleMessage::new(LifecycleEvent::MiddlewareReady, "test"));
        bus.publish(LifecycleMessage::new(LifecycleEvent::MiddlewareReady, "test"));

        assert_eq!(ready.load(Ordering::SeqCst), 2);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let bus = LifecycleBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(LifecycleEvent::Started, |_| Err(eyre::eyre!("boom")));
        bus.subscribe(LifecycleEvent::Started, |_| panic!("handler panic"));
        let seen_clone = seen.clone();
        bus.subscribe(LifecycleEvent::Started, move |msg| {
            seen_clone.lock().unwrap().push(msg.source.clone());
            Ok(())
        });

        let delivered = bus.publish(LifecycleMessage::new(LifecycleEvent::Started, "server-1"));

        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["server-1".to_string()]);
    }

    #[test]
    fn test_late_subscriber_gets_nothing() {
        let bus = LifecycleBus::new();
        bus.publish(LifecycleMessage::new(LifecycleEvent::ConnectorsReady, "test"));

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(LifecycleEvent::ConnectorsReady, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(LifecycleEvent::ConnectorsReady), 1);
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = Arc::new(LifecycleBus::new());
        let fetched = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        bus.subscribe(LifecycleEvent::RemoteSchemasFetching, move |msg| {
            inner_bus.publish(LifecycleMessage::new(
                LifecycleEvent::RemoteSchemasFetched,
                msg.source.clone(),
            ));
            Ok(())
        });
        let fetched_clone = fetched.clone();
        bus.subscribe(LifecycleEvent::RemoteSchemasFetched, move |_| {
            fetched_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(LifecycleMessage::new(
            LifecycleEvent::RemoteSchemasFetching,
            "resolver",
        ));
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
    }
}
