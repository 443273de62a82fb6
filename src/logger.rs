use crate::event::ReaderEvent;
use crate::eventbus::ReaderListener;
use tracing::{trace, warn};

/// A listener that logs every event through `tracing`.
///
/// Frames go to `trace` (they arrive at up to ~60 Hz per device), errors to `warn`.
#[derive(Debug, Default)]
pub struct LogListener {
    frames: u64,
}

impl LogListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames seen so far.
    pub fn frames_seen(&self) -> u64 {
        self.frames
    }
}

impl ReaderListener for LogListener {
    fn on_event(&mut self, event: &ReaderEvent) {
        match event {
            ReaderEvent::Frame { device, frame } => {
                self.frames += 1;
                trace!(%device, len = frame.len(), bytes = ?frame.as_bytes(), "frame");
            }
            ReaderEvent::Error { device, error } => match device {
                Some(device) => warn!(%device, %error, "reader error"),
                None => warn!(%error, "reader error"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::error::ReaderError;
    use crate::Frame;

    #[test]
    fn counts_frames_only() {
        let mut l = LogListener::new();
        l.on_event(&ReaderEvent::Frame {
            device: DeviceId::Slot(0),
            frame: Frame::new(&[0; 12]),
        });
        l.on_event(&ReaderEvent::Error {
            device: None,
            error: ReaderError::Disconnected,
        });
        assert_eq!(l.frames_seen(), 1);
    }
}
