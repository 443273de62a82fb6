//! The composite reader: one surface over every available backend.
//!
//! [`Router`] lists controllers from all backends (polled native first, then HID) and
//! routes a start request to the backend named by the descriptor. At most one session
//! runs across the whole router: starting any device first stops whatever was
//! running, regardless of which backend owned it.
//!
//! ```no_run
//! use padscope::{EventFilter, ReaderConfig, ReaderEvent, Router};
//!
//! let mut router = Router::new(&ReaderConfig::default());
//! router.subscribe(
//!     |e: &ReaderEvent| {
//!         if let Some(frame) = e.frame() {
//!             println!("{:02x?}", frame.as_bytes());
//!         }
//!     },
//!     EventFilter::FramesOnly,
//! );
//! if let Some(pad) = router.connected_controllers().first() {
//!     router.start_reading(pad).ok();
//! }
//! ```
//!
//! Listeners run on a session's worker thread. They must not call back into the
//! router; hand work off to another thread instead.

use crate::backends::{probe_backends, ControllerBackend};
use crate::config::ReaderConfig;
use crate::device::{BackendKind, DeviceDescriptor};
use crate::error::{ReaderError, Result};
use crate::event::ReaderEvent;
use crate::eventbus::{EventBus, EventFilter, ReaderListener, SubscriptionId};
use tracing::{debug, info, warn};

pub struct Router {
    bus: EventBus,
    backends: Vec<Box<dyn ControllerBackend>>,
    active: Option<usize>,
    disposed: bool,
}

impl Router {
    /// Probes the platform and wires every backend found to a fresh event bus.
    pub fn new(config: &ReaderConfig) -> Self {
        let bus = EventBus::new();
        let backends = probe_backends(&bus, config);
        info!(backends = backends.len(), "controller router ready");
        Self::with_backends(bus, backends)
    }

    /// Builds a router over explicit backends. They must publish on `bus`.
    pub fn with_backends(bus: EventBus, mut backends: Vec<Box<dyn ControllerBackend>>) -> Self {
        // polled native devices are listed first; stable within a kind
        backends.sort_by_key(|b| match b.kind() {
            BackendKind::PolledNative => 0,
            BackendKind::InterruptHid => 1,
        });
        Self {
            bus,
            backends,
            active: None,
            disposed: false,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(
        &self,
        listener: impl ReaderListener + 'static,
        filter: EventFilter,
    ) -> SubscriptionId {
        self.bus.subscribe(listener, filter)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Backend kinds present on this router, in listing order.
    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// All attached controllers, polled native first. Empty once disposed.
    pub fn connected_controllers(&self) -> Vec<DeviceDescriptor> {
        if self.disposed {
            return Vec::new();
        }
        self.backends
            .iter()
            .flat_map(|b| b.connected_controllers())
            .collect()
    }

    /// Stops the current session (if any) and starts reading `device`.
    ///
    /// Fails with [`ReaderError::DeviceUnavailable`] when the router is disposed or
    /// no backend of the descriptor's kind exists; an error event is published too.
    pub fn start_reading(&mut self, device: &DeviceDescriptor) -> Result<()> {
        self.stop_reading();

        let found = if self.disposed {
            None
        } else {
            self.backends.iter().position(|b| b.kind() == device.backend)
        };
        let Some(idx) = found else {
            let reason = if self.disposed {
                "reader disposed".to_string()
            } else {
                format!("no {} backend available", device.backend)
            };
            let error = ReaderError::DeviceUnavailable(reason);
            warn!(device = %device.id, %error, "cannot start session");
            self.bus.publish(&ReaderEvent::Error {
                device: Some(device.id.clone()),
                error: error.clone(),
            });
            return Err(error);
        };

        debug!(device = %device.id, backend = %device.backend, "routing start");
        self.backends[idx].start_reading(device)?;
        self.active = Some(idx);
        Ok(())
    }

    /// Stops the active session. No-op when nothing is reading.
    pub fn stop_reading(&mut self) {
        if let Some(idx) = self.active.take() {
            self.backends[idx].stop_reading();
        }
    }

    pub fn is_reading(&self) -> bool {
        self.active
            .map(|idx| self.backends[idx].is_reading())
            .unwrap_or(false)
    }

    /// Stops the session and disposes every backend. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop_reading();
        for backend in self.backends.iter_mut() {
            backend.dispose();
        }
        self.disposed = true;
        debug!("controller router disposed");
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.dispose();
    }
}
