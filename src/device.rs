//! Device descriptors.
//!
//! A [`DeviceDescriptor`] is an immutable value produced fresh by every enumeration
//! call. It carries no OS handle: holding one after the physical device has been
//! unplugged is fine, starting it simply fails (or the session reports a read failure).
//!
//! # Identity
//! - Interrupt-driven (HID) devices are identified by their OS path, which is opaque
//!   and may change across ports and reconnects.
//! - Polled (XInput) devices are identified by their slot index `0..4`.
//!
//! The [`BackendKind`] strictly decides which backend may open a descriptor; handing a
//! descriptor to the wrong backend is a caller error, never a silent fallback.

use serde::Serialize;
use std::fmt;

/// Which access path a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    /// HID reports read with a short blocking timeout.
    InterruptHid,
    /// XInput state queried at a fixed cadence.
    PolledNative,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::InterruptHid => f.write_str("hid"),
            BackendKind::PolledNative => f.write_str("xinput"),
        }
    }
}

/// Backend-specific identity of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceId {
    /// OS/topology path (opaque).
    Path(String),
    /// XInput user index.
    Slot(u8),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Path(p) => f.write_str(p),
            DeviceId::Slot(s) => write!(f, "xinput:{s}"),
        }
    }
}

/// Placeholder product name when the device refuses to report one.
pub const UNKNOWN_PRODUCT: &str = "Unknown Device";
/// Placeholder manufacturer when the device refuses to report one.
pub const UNKNOWN_MANUFACTURER: &str = "Unknown";

/// Snapshot describing one attached controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Product string, or the friendly slot name for XInput devices.
    pub product_name: String,
    pub manufacturer: String,
    pub backend: BackendKind,
    /// Length of a frame produced for this device.
    pub max_report_len: usize,
}

impl DeviceDescriptor {
    /// Slot index for polled devices; `None` for HID devices.
    pub fn slot(&self) -> Option<u8> {
        match self.id {
            DeviceId::Slot(s) => Some(s),
            DeviceId::Path(_) => None,
        }
    }

    /// OS path for HID devices; `None` for polled devices.
    pub fn path(&self) -> Option<&str> {
        match &self.id {
            DeviceId::Path(p) => Some(p),
            DeviceId::Slot(_) => None,
        }
    }

    /// User-facing label.
    ///
    /// HID devices render as `"<product> (VVVV:PPPP)"`; XInput devices already carry a
    /// friendly name such as `"Xbox Controller #1"`.
    pub fn display_name(&self) -> String {
        match self.backend {
            BackendKind::InterruptHid => format!(
                "{} ({:04X}:{:04X})",
                self.product_name, self.vendor_id, self.product_id
            ),
            BackendKind::PolledNative => self.product_name.clone(),
        }
    }

    /// Short identity line, e.g. `"VID:045E PID:028E"` or `"XInput Index: 0"`.
    pub fn id_label(&self) -> String {
        match self.id {
            DeviceId::Slot(s) => format!("XInput Index: {s}"),
            DeviceId::Path(_) => format!("VID:{:04X} PID:{:04X}", self.vendor_id, self.product_id),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}
