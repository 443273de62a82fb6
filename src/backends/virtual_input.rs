//! Scriptable in-memory devices.
//!
//! [`VirtualHid`] implements [`HidHost`] and [`VirtualXInput`] implements
//! [`XInputApi`], so both backends can run against devices driven from code: attach
//! and detach controllers, feed reports, change pad state. Handles are cheap clones of
//! shared state, so a test keeps one handle while the backend owns another.
//!
//! ```
//! use padscope::backends::virtual_input::{VirtualHid, GAMEPAD_DESCRIPTOR};
//!
//! let hid = VirtualHid::new();
//! hid.attach_gamepad("virtual:hid:0", 0x1234, 0x0001, "Virtual Pad");
//! hid.feed("virtual:hid:0", &[1, 2, 3, 4, 5, 6]);
//! assert_eq!(GAMEPAD_DESCRIPTOR[3], 0x05);
//! ```

use crate::backends::hid::{HidCandidate, HidHost, ReportStream};
use crate::backends::xinput::{ControllerSubtype, XInputApi};
use crate::codec::GamepadState;
use crate::error::{ReaderError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Single-report gamepad: 16 buttons and four 8-bit axes (6-byte reports, no report ID).
pub const GAMEPAD_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Game Pad)
    0xA1, 0x01, // Collection (Application)
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x10, //   Usage Maximum (16)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x10, //   Report Count (16)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x09, 0x32, //   Usage (Z)
    0x09, 0x35, //   Usage (Rz)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x04, //   Report Count (4)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0xC0, // End Collection
];

/// Rudder pedals on the Simulation Controls page: report ID 2, three 16-bit axes
/// (7-byte reports including the ID).
pub const PEDALS_DESCRIPTOR: &[u8] = &[
    0x05, 0x02, // Usage Page (Simulation Controls)
    0x09, 0xBA, // Usage (Rudder)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x02, //   Report ID (2)
    0x09, 0xC4, //   Usage (Accelerator)
    0x09, 0xC5, //   Usage (Brake)
    0x09, 0xBA, //   Usage (Rudder)
    0x75, 0x10, //   Report Size (16)
    0x95, 0x03, //   Report Count (3)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0xC0, // End Collection
];

struct VirtualHidDevice {
    candidate: HidCandidate,
    pending: VecDeque<Vec<u8>>,
    attached: bool,
}

#[derive(Default)]
struct HidState {
    devices: Vec<VirtualHidDevice>,
    enumeration_error: Option<String>,
    open_streams: usize,
}

#[derive(Default)]
struct HidShared {
    state: Mutex<HidState>,
    wake: Condvar,
}

impl HidShared {
    fn lock(&self) -> MutexGuard<'_, HidState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`HidHost`].
#[derive(Clone, Default)]
pub struct VirtualHid {
    shared: Arc<HidShared>,
}

impl VirtualHid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a device. Replaces any device with the same path.
    pub fn attach(&self, candidate: HidCandidate) {
        let mut s = self.shared.lock();
        s.devices.retain(|d| d.candidate.path != candidate.path);
        s.devices.push(VirtualHidDevice {
            candidate,
            pending: VecDeque::new(),
            attached: true,
        });
    }

    /// Plug in a gamepad built from [`GAMEPAD_DESCRIPTOR`].
    pub fn attach_gamepad(&self, path: &str, vendor_id: u16, product_id: u16, product: &str) {
        self.attach(HidCandidate::from_descriptor_bytes(
            path,
            vendor_id,
            product_id,
            Some(product.to_string()),
            Some("Virtual".to_string()),
            Ok(GAMEPAD_DESCRIPTOR.to_vec()),
        ));
    }

    /// Unplug a device: it disappears from enumeration and open streams fail.
    pub fn detach(&self, path: &str) {
        let mut s = self.shared.lock();
        for d in s.devices.iter_mut().filter(|d| d.candidate.path == path) {
            d.attached = false;
        }
        drop(s);
        self.shared.wake.notify_all();
    }

    /// Queue one input report for `path`.
    pub fn feed(&self, path: &str, report: &[u8]) {
        let mut s = self.shared.lock();
        if let Some(d) = s.devices.iter_mut().find(|d| d.candidate.path == path) {
            d.pending.push_back(report.to_vec());
        }
        drop(s);
        self.shared.wake.notify_all();
    }

    /// Make enumeration fail with `reason` (or succeed again with `None`).
    pub fn fail_enumeration(&self, reason: Option<&str>) {
        self.shared.lock().enumeration_error = reason.map(str::to_owned);
    }

    /// Number of currently open streams.
    pub fn open_streams(&self) -> usize {
        self.shared.lock().open_streams
    }

    /// Reports queued for `path` and not yet read.
    pub fn pending(&self, path: &str) -> usize {
        self.shared
            .lock()
            .devices
            .iter()
            .find(|d| d.candidate.path == path)
            .map_or(0, |d| d.pending.len())
    }
}

impl HidHost for VirtualHid {
    type Stream = VirtualHidStream;

    fn candidates(&self) -> Result<Vec<HidCandidate>> {
        let s = self.shared.lock();
        if let Some(reason) = &s.enumeration_error {
            return Err(ReaderError::Enumeration(reason.clone()));
        }
        Ok(s.devices
            .iter()
            .filter(|d| d.attached)
            .map(|d| d.candidate.clone())
            .collect())
    }

    fn open(&self, path: &str) -> Result<VirtualHidStream> {
        let mut s = self.shared.lock();
        if !s.devices.iter().any(|d| d.attached && d.candidate.path == path) {
            return Err(ReaderError::DeviceUnavailable(format!("no device at {path}")));
        }
        s.open_streams += 1;
        Ok(VirtualHidStream {
            shared: self.shared.clone(),
            path: path.to_string(),
        })
    }
}

/// Open stream on a [`VirtualHid`] device.
pub struct VirtualHidStream {
    shared: Arc<HidShared>,
    path: String,
}

impl ReportStream for VirtualHidStream {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut s = self.shared.lock();
        loop {
            let Some(device) = s
                .devices
                .iter_mut()
                .find(|d| d.candidate.path == self.path)
            else {
                return Err(ReaderError::ReadFailed("device removed".into()));
            };
            if !device.attached {
                return Err(ReaderError::ReadFailed("device removed".into()));
            }
            if let Some(report) = device.pending.pop_front() {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                return Ok(n);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            s = self
                .shared
                .wake
                .wait_timeout(s, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for VirtualHidStream {
    fn drop(&mut self) {
        let mut s = self.shared.lock();
        s.open_streams = s.open_streams.saturating_sub(1);
    }
}

#[derive(Clone, Copy)]
struct VirtualPad {
    state: GamepadState,
    /// `None` makes the capability query fail.
    subtype: Option<ControllerSubtype>,
}

#[derive(Default)]
struct PadSlots {
    pads: [Option<VirtualPad>; 4],
    queries: [u64; 4],
}

/// In-memory [`XInputApi`] with four slots.
#[derive(Clone, Default)]
pub struct VirtualXInput {
    slots: Arc<Mutex<PadSlots>>,
}

impl VirtualXInput {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PadSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect a pad in `slot` (0..4). Out-of-range slots are ignored.
    pub fn connect(&self, slot: u8, subtype: Option<ControllerSubtype>) {
        if let Some(p) = self.lock().pads.get_mut(slot as usize) {
            *p = Some(VirtualPad {
                state: GamepadState::default(),
                subtype,
            });
        }
    }

    pub fn disconnect(&self, slot: u8) {
        if let Some(p) = self.lock().pads.get_mut(slot as usize) {
            *p = None;
        }
    }

    /// Replace the state reported by a connected pad.
    pub fn set_state(&self, slot: u8, state: GamepadState) {
        if let Some(Some(p)) = self.lock().pads.get_mut(slot as usize) {
            p.state = state;
        }
    }

    /// How many state queries `slot` has answered or refused.
    pub fn queries(&self, slot: u8) -> u64 {
        self.lock().queries.get(slot as usize).copied().unwrap_or(0)
    }
}

impl XInputApi for VirtualXInput {
    fn state(&self, slot: u8) -> Result<GamepadState> {
        let mut s = self.lock();
        let i = slot as usize;
        if let Some(q) = s.queries.get_mut(i) {
            *q += 1;
        }
        match s.pads.get(i).copied().flatten() {
            Some(p) => Ok(p.state),
            None => Err(ReaderError::Disconnected),
        }
    }

    fn subtype(&self, slot: u8) -> Option<ControllerSubtype> {
        self.lock()
            .pads
            .get(slot as usize)
            .copied()
            .flatten()
            .and_then(|p| p.subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_reads_fed_reports_then_times_out() {
        let hid = VirtualHid::new();
        hid.attach_gamepad("p", 1, 2, "Pad");
        hid.feed("p", &[7, 8, 9]);

        let mut stream = hid.open("p").unwrap();
        assert_eq!(hid.open_streams(), 1);

        let mut buf = [0u8; 6];
        assert_eq!(stream.read_timeout(&mut buf, Duration::from_millis(5)).unwrap(), 3);
        assert_eq!(&buf[..3], &[7, 8, 9]);
        assert_eq!(stream.read_timeout(&mut buf, Duration::from_millis(5)).unwrap(), 0);

        hid.detach("p");
        assert!(stream.read_timeout(&mut buf, Duration::from_millis(5)).is_err());
        drop(stream);
        assert_eq!(hid.open_streams(), 0);
        assert!(hid.open("p").is_err());
    }

    #[test]
    fn blocked_read_wakes_on_feed() {
        let hid = VirtualHid::new();
        hid.attach_gamepad("p", 1, 2, "Pad");
        let mut stream = hid.open("p").unwrap();
        let feeder = hid.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            feeder.feed("p", &[1]);
        });
        let mut buf = [0u8; 6];
        let n = stream.read_timeout(&mut buf, Duration::from_secs(2)).unwrap();
        assert_eq!(n, 1);
        t.join().unwrap();
    }

    #[test]
    fn pads_report_state_and_count_queries() {
        let x = VirtualXInput::new();
        assert_eq!(x.state(0), Err(ReaderError::Disconnected));
        x.connect(0, Some(ControllerSubtype::Wheel));
        x.set_state(
            0,
            GamepadState {
                buttons: 0x1000,
                ..Default::default()
            },
        );
        assert_eq!(x.state(0).unwrap().buttons, 0x1000);
        assert_eq!(x.subtype(0), Some(ControllerSubtype::Wheel));
        assert_eq!(x.queries(0), 2);
        assert_eq!(x.state(9), Err(ReaderError::Disconnected));
    }
}
