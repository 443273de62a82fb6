//! Publish/subscribe fan-out for [`ReaderEvent`]s.
//!
//! The bus is a cheap cloneable handle; every backend of a router shares one. Listeners
//! stay registered until [`EventBus::unsubscribe`] is called, so dropping the id does
//! not drop the listener.
//!
//! Listener callbacks run on the session thread while the bus is locked. A callback
//! must not call back into the router or a backend (start/stop), or it will deadlock.

use crate::device::DeviceId;
use crate::event::ReaderEvent;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Trait for reacting to events from any backend.
pub trait ReaderListener: Send {
    fn on_event(&mut self, event: &ReaderEvent);
}

impl<F> ReaderListener for F
where
    F: FnMut(&ReaderEvent) + Send,
{
    fn on_event(&mut self, event: &ReaderEvent) {
        self(event)
    }
}

/// Determines which kinds of events a listener wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventFilter {
    #[default]
    All,
    FramesOnly,
    ErrorsOnly,
}

impl EventFilter {
    fn passes(self, event: &ReaderEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::FramesOnly => matches!(event, ReaderEvent::Frame { .. }),
            EventFilter::ErrorsOnly => matches!(event, ReaderEvent::Error { .. }),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct ListenerEntry {
    listener: Box<dyn ReaderListener>,
    enabled: bool,
    filter: EventFilter,
    /// Only deliver events from this device.
    device: Option<DeviceId>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<u64, ListenerEntry>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Listeners>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener for every device.
    pub fn subscribe(
        &self,
        listener: impl ReaderListener + 'static,
        filter: EventFilter,
    ) -> SubscriptionId {
        self.subscribe_device(listener, filter, None)
    }

    /// Registers a listener, optionally restricted to one device.
    pub fn subscribe_device(
        &self,
        listener: impl ReaderListener + 'static,
        filter: EventFilter,
        device: Option<DeviceId>,
    ) -> SubscriptionId {
        let mut l = self.lock();
        let id = l.next_id;
        l.next_id += 1;
        l.entries.insert(
            id,
            ListenerEntry {
                listener: Box::new(listener),
                enabled: true,
                filter,
                device,
            },
        );
        SubscriptionId(id)
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().entries.remove(&id.0).is_some()
    }

    /// Enables a previously muted listener.
    pub fn enable(&self, id: SubscriptionId) {
        if let Some(entry) = self.lock().entries.get_mut(&id.0) {
            entry.enabled = true;
        }
    }

    /// Mutes a listener without removing it.
    pub fn disable(&self, id: SubscriptionId) {
        if let Some(entry) = self.lock().entries.get_mut(&id.0) {
            entry.enabled = false;
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Delivers one event to all enabled, matching listeners.
    pub fn publish(&self, event: &ReaderEvent) {
        let mut l = self.lock();
        Self::deliver(&mut l, event);
    }

    /// Delivers `event` only if `still_live` holds, evaluated under the bus lock.
    ///
    /// Paired with [`EventBus::fence`] this guarantees that a session cancelled
    /// before the fence never publishes after it.
    pub fn publish_if(&self, still_live: impl Fn() -> bool, event: &ReaderEvent) -> bool {
        let mut l = self.lock();
        if !still_live() {
            return false;
        }
        Self::deliver(&mut l, event);
        true
    }

    /// Waits for any in-flight delivery to finish.
    pub fn fence(&self) {
        drop(self.lock());
    }

    fn deliver(l: &mut Listeners, event: &ReaderEvent) {
        for (id, entry) in l.entries.iter_mut() {
            if !entry.enabled || !entry.filter.passes(event) {
                continue;
            }
            if let Some(ref wanted) = entry.device {
                if event.device() != Some(wanted) {
                    continue;
                }
            }
            let listener = &mut entry.listener;
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                warn!(subscription = id, "listener panicked while handling an event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use crate::frame::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame_event(slot: u8) -> ReaderEvent {
        ReaderEvent::Frame {
            device: DeviceId::Slot(slot),
            frame: Frame::new(&[slot]),
        }
    }

    fn error_event() -> ReaderEvent {
        ReaderEvent::Error {
            device: None,
            error: ReaderError::Enumeration("boom".into()),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut(&ReaderEvent) + Send) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = n.clone();
        (n, move |_: &ReaderEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn filters_split_frames_and_errors() {
        let bus = EventBus::new();
        let (frames, f) = counter();
        let (errors, e) = counter();
        bus.subscribe(f, EventFilter::FramesOnly);
        bus.subscribe(e, EventFilter::ErrorsOnly);

        bus.publish(&frame_event(0));
        bus.publish(&error_event());
        bus.publish(&frame_event(1));

        assert_eq!(frames.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_and_mute() {
        let bus = EventBus::new();
        let (n, f) = counter();
        let id = bus.subscribe(f, EventFilter::All);

        bus.disable(id);
        bus.publish(&frame_event(0));
        assert_eq!(n.load(Ordering::SeqCst), 0);

        bus.enable(id);
        bus.publish(&frame_event(0));
        assert_eq!(n.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&frame_event(0));
        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn device_restricted_listener() {
        let bus = EventBus::new();
        let (n, f) = counter();
        bus.subscribe_device(f, EventFilter::All, Some(DeviceId::Slot(1)));
        bus.publish(&frame_event(0));
        bus.publish(&frame_event(1));
        bus.publish(&error_event());
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_if_respects_guard() {
        let bus = EventBus::new();
        let (n, f) = counter();
        bus.subscribe(f, EventFilter::All);
        assert!(!bus.publish_if(|| false, &frame_event(0)));
        assert!(bus.publish_if(|| true, &frame_event(0)));
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_starve_others() {
        let bus = EventBus::new();
        bus.subscribe(|_: &ReaderEvent| panic!("bad listener"), EventFilter::All);
        let (n, f) = counter();
        bus.subscribe(f, EventFilter::All);
        bus.publish(&frame_event(0));
        bus.publish(&frame_event(0));
        assert_eq!(n.load(Ordering::SeqCst), 2);
    }
}
