use crate::event::ReaderEvent;
use crate::eventbus::ReaderListener;

/// Wraps a listener and forwards only events accepted by a predicate.
///
/// Useful when [`EventFilter`](crate::eventbus::EventFilter) is too coarse, e.g. to
/// forward only frames whose first byte changed.
pub struct FilteredListener {
    predicate: Box<dyn FnMut(&ReaderEvent) -> bool + Send>,
    inner: Box<dyn ReaderListener>,
}

impl FilteredListener {
    pub fn new(
        predicate: impl FnMut(&ReaderEvent) -> bool + Send + 'static,
        inner: impl ReaderListener + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            inner: Box::new(inner),
        }
    }

    /// Forward a frame only when its bytes differ from the previously forwarded frame.
    /// Errors always pass.
    pub fn on_change(inner: impl ReaderListener + 'static) -> Self {
        let mut last: Option<crate::Frame> = None;
        Self::new(
            move |event| match event.frame() {
                Some(frame) => {
                    let changed = last
                        .as_ref()
                        .map_or(true, |prev| prev.as_bytes() != frame.as_bytes());
                    if changed {
                        last = Some(frame.clone());
                    }
                    changed
                }
                None => true,
            },
            inner,
        )
    }
}

impl ReaderListener for FilteredListener {
    fn on_event(&mut self, event: &ReaderEvent) {
        if (self.predicate)(event) {
            self.inner.on_event(event);
        }
    }
}
