//! Event bus routing.
//!
//! # Design
//! - Synchronous handlers run on the publishing thread, in registration order.
//! - The handler list is copy-on-write: publishing clones an `Arc` and never holds a lock
//!   while handlers run, so a handler may register or unregister other handlers.
//! - Asynchronous observers receive envelopes through a `tokio::broadcast` stream with a
//!   bounded replay ring; lagging observers lose the oldest events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio_stream::wrappers::BroadcastStream;

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Stream wrapper used by asynchronous subscribers.
pub type EventStream = BroadcastStream<EventEnvelope>;

/// Identifier returned when registering a synchronous handler.
pub type HandlerId = u64;

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;
type HandlerList = Arc<Vec<(HandlerId, Handler)>>;

/// Shared event bus built on top of `tokio::broadcast` plus synchronous handlers.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    replay: Arc<Mutex<VecDeque<EventEnvelope>>>,
    replay_capacity: usize,
    next_id: Arc<AtomicU64>,
    handlers: Arc<RwLock<HandlerList>>,
    next_handler: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let replay_capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(replay_capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(VecDeque::with_capacity(replay_capacity))),
            replay_capacity,
            next_id: Arc::new(AtomicU64::new(1)),
            handlers: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            next_handler: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Register a handler invoked synchronously for every published event.
    pub fn register_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_handler.fetch_add(1, Ordering::Relaxed);
        let mut guard = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push((id, Arc::new(handler) as Handler));
        *guard = Arc::new(next);
        id
    }

    /// Remove a previously registered handler. Returns `false` when the id is unknown.
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        let mut guard = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next = guard
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect::<Vec<_>>();
        *guard = Arc::new(next);
        true
    }

    /// Subscribe to the bus, replaying buffered events newer than `last_event_id`.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        let mut rx = self.sender.subscribe();
        if let Some(last) = last_event_id {
            self.replay(last, &mut rx);
        }
        BroadcastStream::new(rx)
    }

    /// Publish an event: run synchronous handlers, then fan out to stream subscribers.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let handlers = Arc::clone(
            &self
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (_, handler) in handlers.iter() {
            handler(&event);
        }

        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut replay = self.lock_replay();
            if replay.len() == self.replay_capacity {
                let _ = replay.pop_front();
            }
            replay.push_back(envelope.clone());
        }
        let _ = self.sender.send(envelope);
        id
    }

    /// Last event id observed in the replay buffer.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_replay().back().map(|env| env.id)
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        let replay = self.lock_replay();
        replay.iter().filter(|env| env.id > id).cloned().collect()
    }

    fn replay(&self, last_event_id: EventId, rx: &mut Receiver<EventEnvelope>) {
        let past = self.backlog_since(last_event_id);
        for env in past {
            let _ = rx.try_recv();
            if self.sender.send(env).is_err() {
                break;
            }
        }
    }

    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio_stream::StreamExt;

    fn settings_event(description: &str) -> Event {
        Event::SettingsChanged {
            description: description.into(),
        }
    }

    #[tokio::test]
    async fn publish_and_replay_from_id() {
        let bus = EventBus::with_capacity(4);
        let first = bus.publish(settings_event("init"));
        let second = bus.publish(Event::HealthChanged {
            degraded: vec!["session".into()],
        });

        assert_eq!(bus.last_event_id(), Some(second));
        let backlog = bus.backlog_since(first);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, second);
    }

    #[tokio::test]
    async fn subscribe_streams_events() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        let id = bus.publish(Event::TorrentFinished {
            hash: "00".repeat(20),
        });
        let envelope = stream
            .next()
            .await
            .expect("stream item")
            .expect("broadcast ok");
        assert_eq!(envelope.id, id);
        assert!(matches!(envelope.event, Event::TorrentFinished { .. }));
    }

    #[test]
    fn replay_ring_drops_oldest_when_full() {
        let bus = EventBus::with_capacity(2);
        for index in 0..3 {
            let _ = bus.publish(settings_event(&index.to_string()));
        }
        let backlog = bus.backlog_since(0);
        assert_eq!(backlog.iter().map(|env| env.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            let _ = bus.register_handler(move |_event| {
                seen.lock().expect("lock").push(label);
            });
        }

        let _ = bus.publish(settings_event("x"));
        assert_eq!(*seen.lock().expect("lock"), vec!["first", "second"]);
    }

    #[test]
    fn unregistered_handler_stops_receiving() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = bus.register_handler(move |event| {
            if matches!(event, Event::SettingsChanged { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let _ = bus.publish(settings_event("a"));
        assert!(bus.unregister_handler(id));
        assert!(!bus.unregister_handler(id));
        let _ = bus.publish(settings_event("b"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let registered = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&registered);
        let _ = bus.register_handler(move |_event| {
            if flag.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = inner_bus.register_handler(|_event| {});
            }
        });

        let _ = bus.publish(settings_event("a"));
        let _ = bus.publish(settings_event("b"));
        assert_eq!(registered.load(Ordering::SeqCst), 2);
    }
}
