//! Polled XInput backend.
//!
//! XInput exposes up to four controllers as user-index slots `0..4`. A slot is
//! present when a state query for it succeeds; its capability subtype (best-effort)
//! picks a friendly name, suffixed with the 1-based slot number:
//! `"Xbox Controller #1"`, `"Racing Wheel #3"`, ...
//!
//! Sessions issue one state query per iteration, then sleep on the cancel token
//! for `poll_interval_ms` (~60 Hz). Every successful query becomes a 12-byte frame
//! (see [`codec`](crate::codec)); a failed query ends the session with
//! [`ReaderError::Disconnected`].

use crate::backends::ControllerBackend;
use crate::codec::{polled_frame, GamepadState, POLLED_FRAME_LEN};
use crate::config::ReaderConfig;
use crate::device::{BackendKind, DeviceDescriptor, DeviceId};
use crate::error::{ReaderError, Result};
use crate::event::ReaderEvent;
use crate::eventbus::EventBus;
use crate::session::{CancelToken, FrameSource, ReadOutcome, Worker};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Number of XInput user slots.
pub const SLOT_COUNT: u8 = 4;

/// Conventional vendor id for XInput devices (Microsoft).
const XINPUT_VENDOR_ID: u16 = 0x045e;

/// XInput device subtype (`XINPUT_CAPABILITIES::SubType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerSubtype {
    Unknown,
    Gamepad,
    Wheel,
    ArcadeStick,
    FlightStick,
    DancePad,
    Guitar,
    GuitarAlternate,
    DrumKit,
    GuitarBass,
    ArcadePad,
    /// A value this crate does not know.
    Other(u8),
}

impl ControllerSubtype {
    /// Map the raw `XINPUT_DEVSUBTYPE_*` value.
    pub fn from_raw(v: u8) -> Self {
        match v {
            0x00 => Self::Unknown,
            0x01 => Self::Gamepad,
            0x02 => Self::Wheel,
            0x03 => Self::ArcadeStick,
            0x04 => Self::FlightStick,
            0x05 => Self::DancePad,
            0x06 => Self::Guitar,
            0x07 => Self::GuitarAlternate,
            0x08 => Self::DrumKit,
            0x0B => Self::GuitarBass,
            0x13 => Self::ArcadePad,
            other => Self::Other(other),
        }
    }

    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::Gamepad => "Xbox Controller",
            Self::Wheel => "Racing Wheel",
            Self::ArcadeStick => "Arcade Stick",
            Self::FlightStick => "Flight Stick",
            Self::DancePad => "Dance Pad",
            Self::Guitar | Self::GuitarAlternate => "Guitar Controller",
            Self::GuitarBass => "Bass Guitar",
            Self::DrumKit => "Drum Kit",
            Self::ArcadePad => "Arcade Pad",
            Self::Unknown | Self::Other(_) => GENERIC_NAME,
        }
    }
}

const GENERIC_NAME: &str = "XInput Controller";

/// Platform XInput access.
pub trait XInputApi: Send + Sync + 'static {
    /// Current state of `slot`. Fails when nothing is connected there.
    fn state(&self, slot: u8) -> Result<GamepadState>;

    /// Device subtype of `slot`, if the capability query succeeds.
    fn subtype(&self, slot: u8) -> Option<ControllerSubtype>;
}

/// Friendly name for a present slot.
pub fn slot_name(subtype: Option<ControllerSubtype>, slot: u8) -> String {
    let base = subtype.map_or(GENERIC_NAME, ControllerSubtype::friendly_name);
    format!("{base} #{}", slot as u32 + 1)
}

struct XInputSource<X> {
    api: Arc<X>,
    slot: u8,
    interval: Duration,
}

impl<X: XInputApi> FrameSource for XInputSource<X> {
    fn read(&mut self, _cancel: &CancelToken) -> ReadOutcome {
        match self.api.state(self.slot) {
            Ok(state) => ReadOutcome::Data(polled_frame(&state)),
            Err(ReaderError::Disconnected) => ReadOutcome::Fatal(ReaderError::Disconnected),
            Err(other) => ReadOutcome::Fatal(ReaderError::ReadFailed(other.to_string())),
        }
    }

    fn pace(&self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// XInput backend over any [`XInputApi`].
pub struct XInputBackend<X: XInputApi> {
    api: Arc<X>,
    bus: EventBus,
    worker: Worker,
    interval: Duration,
    disposed: bool,
}

impl<X: XInputApi> XInputBackend<X> {
    pub fn new(api: X, bus: EventBus, config: &ReaderConfig) -> Self {
        Self {
            api: Arc::new(api),
            worker: Worker::new("xinput", bus.clone(), config.stop_grace()),
            bus,
            interval: config.poll_interval(),
            disposed: false,
        }
    }

    fn describe(&self, slot: u8) -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId::Slot(slot),
            vendor_id: XINPUT_VENDOR_ID,
            product_id: 0,
            product_name: slot_name(self.api.subtype(slot), slot),
            manufacturer: "Microsoft".to_string(),
            backend: BackendKind::PolledNative,
            max_report_len: POLLED_FRAME_LEN,
        }
    }
}

impl<X: XInputApi> ControllerBackend for XInputBackend<X> {
    fn kind(&self) -> BackendKind {
        BackendKind::PolledNative
    }

    fn connected_controllers(&self) -> Vec<DeviceDescriptor> {
        let probed = catch_unwind(AssertUnwindSafe(|| {
            (0..SLOT_COUNT)
                .filter(|&slot| self.api.state(slot).is_ok())
                .map(|slot| self.describe(slot))
                .collect::<Vec<_>>()
        }));

        match probed {
            Ok(list) => {
                debug!(present = list.len(), "XInput slots probed");
                list
            }
            Err(_) => {
                let error = ReaderError::Enumeration("XInput query panicked".into());
                warn!(%error, "XInput enumeration failed");
                self.bus.publish(&ReaderEvent::Error {
                    device: None,
                    error,
                });
                Vec::new()
            }
        }
    }

    fn start_reading(&mut self, device: &DeviceDescriptor) -> Result<()> {
        if device.backend != BackendKind::PolledNative {
            return Err(ReaderError::BackendMismatch {
                expected: BackendKind::PolledNative,
                actual: device.backend,
            });
        }
        self.worker.stop();

        let slot = match device.slot() {
            Some(s) if s < SLOT_COUNT && !self.disposed => s,
            _ => {
                let reason = if self.disposed {
                    "XInput backend disposed".to_string()
                } else {
                    format!("no XInput slot {}", device.id)
                };
                let error = ReaderError::DeviceUnavailable(reason);
                self.bus.publish(&ReaderEvent::Error {
                    device: Some(device.id.clone()),
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        let source = XInputSource {
            api: self.api.clone(),
            slot,
            interval: self.interval,
        };
        self.worker.start(device.id.clone(), source)
    }

    fn stop_reading(&mut self) {
        self.worker.stop();
    }

    fn is_reading(&self) -> bool {
        self.worker.is_reading()
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.worker.stop();
        self.disposed = true;
    }
}
