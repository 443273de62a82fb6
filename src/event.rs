//! Events delivered to subscribers.
//!
//! A running session produces two kinds of events:
//! - [`ReaderEvent::Frame`] for every successful read, strictly in read order,
//! - [`ReaderEvent::Error`] for enumeration/open failures and fatal read failures.
//!
//! Events are delivered on the session's background thread. A presentation layer
//! must hop to its own thread if it needs to, and should treat the frame as read-only
//! (it is; copy the bytes out if they need to outlive the event).

use crate::device::DeviceId;
use crate::error::ReaderError;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub enum ReaderEvent {
    /// One report from the device identified by `device`.
    Frame { device: DeviceId, frame: Frame },

    /// A failure. `device` is `None` for failures not tied to a device (enumeration).
    Error {
        device: Option<DeviceId>,
        error: ReaderError,
    },
}

impl ReaderEvent {
    /// Device the event originates from, if any.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            ReaderEvent::Frame { device, .. } => Some(device),
            ReaderEvent::Error { device, .. } => device.as_ref(),
        }
    }

    pub fn frame(&self) -> Option<&Frame> {
        match self {
            ReaderEvent::Frame { frame, .. } => Some(frame),
            ReaderEvent::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ReaderError> {
        match self {
            ReaderEvent::Error { error, .. } => Some(error),
            ReaderEvent::Frame { .. } => None,
        }
    }
}
