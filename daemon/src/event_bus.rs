/// In-process typed publish/subscribe channel shared by both monitors.
///
/// Handlers run synchronously on the publishing thread, in registration
/// order.  A consumer that lives on another thread (the daemon's tokio event
/// loop, a UI) should use [`EventBus::forward`] to hop over a bounded channel
/// instead of doing work inside the handler.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{EventKind, MonitorEvent};

type Handler = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

/// Returned by [`EventBus::subscribe`]; pass to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

pub struct EventBus {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Registers `handler` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                kind,
                handler: Arc::new(handler),
            });
        id
    }

    /// Removes a subscription.  Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Delivers `event` to every handler registered for its kind and returns
    /// how many were invoked.
    ///
    /// The handler list is snapshotted first so a handler may itself
    /// subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: &MonitorEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Subscribes to each of `kinds` and pushes matching events, wrapped by
    /// `wrap`, into `tx`.
    ///
    /// Uses [`try_send`](mpsc::Sender::try_send) so a monitor thread never
    /// blocks on a slow consumer; when the channel is full the event is
    /// dropped.
    pub fn forward<T, F>(&self, kinds: &[EventKind], tx: mpsc::Sender<T>, wrap: F) -> Vec<SubscriptionId>
    where
        T: Send + 'static,
        F: Fn(MonitorEvent) -> T + Send + Sync + 'static,
    {
        let wrap = Arc::new(wrap);
        kinds
            .iter()
            .map(|&kind| {
                let tx = tx.clone();
                let wrap = Arc::clone(&wrap);
                self.subscribe(kind, move |event| {
                    if let Err(e) = tx.try_send(wrap(event.clone())) {
                        debug!(?kind, "Dropping forwarded event: {e}");
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AxisEvent, ButtonEvent, ProcessRunningChanged};
    use std::sync::Mutex;

    fn axis(value: i32) -> MonitorEvent {
        MonitorEvent::AxisMotion(AxisEvent { device_id: 0, axis: 1, value, timestamp: 5.0 })
    }

    fn press(button: usize) -> MonitorEvent {
        MonitorEvent::ButtonPressed(ButtonEvent { device_id: 0, button, timestamp: 5.0 })
    }

    // ── publish ───────────────────────────────────────────────────────────────

    #[test]
    fn publish_without_subscribers_invokes_nothing() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&axis(10)), 0);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe(EventKind::AxisMotion, move |_| log.lock().unwrap().push(tag));
        }

        assert_eq!(bus.publish(&axis(10)), 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn handlers_only_receive_their_kind() {
        let bus = EventBus::new();
        let axes = Arc::new(Mutex::new(Vec::new()));
        let presses = Arc::new(Mutex::new(Vec::new()));
        {
            let axes = Arc::clone(&axes);
            bus.subscribe(EventKind::AxisMotion, move |e| axes.lock().unwrap().push(e.clone()));
        }
        {
            let presses = Arc::clone(&presses);
            bus.subscribe(EventKind::ButtonPressed, move |e| presses.lock().unwrap().push(e.clone()));
        }

        bus.publish(&axis(-40));
        bus.publish(&press(7));
        bus.publish(&MonitorEvent::ProcessRunningChanged(ProcessRunningChanged {
            name: "Elite".into(),
            is_running: true,
        }));

        assert_eq!(*axes.lock().unwrap(), vec![axis(-40)]);
        assert_eq!(*presses.lock().unwrap(), vec![press(7)]);
    }

    #[test]
    fn handlers_run_on_the_publishing_thread() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::AxisMotion, move |_| {
                *seen.lock().unwrap() = Some(std::thread::current().id());
            });
        }

        let publisher = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                bus.publish(&axis(1));
                std::thread::current().id()
            })
        };
        let publisher_id = publisher.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(publisher_id));
    }

    // ── unsubscribe ───────────────────────────────────────────────────────────

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let id = {
            let count = Arc::clone(&count);
            bus.subscribe(EventKind::AxisMotion, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        bus.publish(&axis(1));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&axis(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        {
            let inner = Arc::clone(&bus);
            bus.subscribe(EventKind::AxisMotion, move |_| {
                inner.subscribe(EventKind::HatMotion, |_| {});
            });
        }
        assert_eq!(bus.publish(&axis(3)), 1);
    }

    // ── forward ───────────────────────────────────────────────────────────────

    #[test]
    fn forward_wraps_events_into_channel() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel::<(EventKind, MonitorEvent)>(8);
        let ids = bus.forward(&[EventKind::AxisMotion, EventKind::ButtonPressed], tx, |e| (e.kind(), e));
        assert_eq!(ids.len(), 2);

        bus.publish(&axis(25));
        bus.publish(&press(1));

        assert_eq!(rx.try_recv().unwrap(), (EventKind::AxisMotion, axis(25)));
        assert_eq!(rx.try_recv().unwrap(), (EventKind::ButtonPressed, press(1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forward_drops_when_channel_is_full() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel::<MonitorEvent>(1);
        bus.forward(&[EventKind::AxisMotion], tx, |e| e);

        bus.publish(&axis(1));
        bus.publish(&axis(2));

        assert_eq!(rx.try_recv().unwrap(), axis(1));
        assert!(rx.try_recv().is_err());
    }
}
