//! Input backends for `padscope`.
//!
//! One backend per access path, each behind [`ControllerBackend`]:
//! - [`hid`]: interrupt-driven HID reads (any platform `hidapi` supports),
//! - [`xinput`]: XInput slots polled at ~60 Hz (Windows only).
//!
//! Platform APIs sit behind small traits ([`hid::HidHost`], [`xinput::XInputApi`]) so
//! the enumeration and session logic is the same for real hardware and for the
//! scriptable devices in [`virtual_input`].
//!
//! # Feature flags
//! - **`hid`**: enables the `hidapi`-backed host (default).

use crate::config::ReaderConfig;
use crate::device::{BackendKind, DeviceDescriptor};
use crate::error::Result;
use crate::eventbus::EventBus;
use tracing::debug;

pub mod hid;
pub mod virtual_input;
pub mod xinput;

#[cfg(windows)]
#[cfg_attr(docsrs, doc(cfg(windows)))]
pub mod windows;

/// One access path: enumeration plus a single-session reader.
pub trait ControllerBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Currently attached controllers. Never fails: problems are published as error
    /// events and an empty list is returned.
    fn connected_controllers(&self) -> Vec<DeviceDescriptor>;

    /// Stop any current session, open `device` and start streaming it.
    ///
    /// A descriptor of another backend kind is rejected with
    /// [`ReaderError::BackendMismatch`](crate::ReaderError::BackendMismatch).
    fn start_reading(&mut self, device: &DeviceDescriptor) -> Result<()>;

    /// Idempotent.
    fn stop_reading(&mut self);

    fn is_reading(&self) -> bool;

    /// Stop and release everything. Later calls are no-ops.
    fn dispose(&mut self);
}

/// Probe which backends exist on this machine.
///
/// Absent backends are simply missing from the result; callers see zero devices for
/// them and cannot start their descriptors.
pub fn probe_backends(bus: &EventBus, config: &ReaderConfig) -> Vec<Box<dyn ControllerBackend>> {
    let out: Vec<Box<dyn ControllerBackend>> = [probe_xinput(bus, config), probe_hid(bus, config)]
        .into_iter()
        .flatten()
        .collect();
    debug!(count = out.len(), "backends probed");
    out
}

#[cfg(windows)]
fn probe_xinput(bus: &EventBus, config: &ReaderConfig) -> Option<Box<dyn ControllerBackend>> {
    match windows::NativeXInput::probe() {
        Some(api) => Some(Box::new(xinput::XInputBackend::new(api, bus.clone(), config))),
        None => {
            debug!("XInput not available");
            None
        }
    }
}

#[cfg(not(windows))]
fn probe_xinput(_: &EventBus, _: &ReaderConfig) -> Option<Box<dyn ControllerBackend>> {
    None
}

#[cfg(feature = "hid")]
fn probe_hid(bus: &EventBus, config: &ReaderConfig) -> Option<Box<dyn ControllerBackend>> {
    match hid::HidapiHost::new() {
        Ok(host) => Some(Box::new(hid::HidBackend::new(host, bus.clone(), config))),
        Err(e) => {
            tracing::warn!(error = %e, "HID backend unavailable");
            None
        }
    }
}

#[cfg(not(feature = "hid"))]
fn probe_hid(_: &EventBus, _: &ReaderConfig) -> Option<Box<dyn ControllerBackend>> {
    None
}
