//! Interrupt-driven HID backend.
//!
//! ## Discovery
//! Every HID device the host reports is classified:
//! 1. max input report length `0` → rejected;
//! 2. readable report descriptor → accepted iff it declares Generic Desktop
//!    Joystick or Game Pad;
//! 3. unreadable descriptor → accepted iff the max input report length is in
//!    `2..=fallback_max_report_len` (64 by default).
//!
//! A readable descriptor always wins over the length heuristic. Missing product or
//! manufacturer strings become placeholders. Enumeration opens each device only long
//! enough to read its descriptor.
//!
//! ## Reading
//! One blocking read per iteration bounded by `hid_read_timeout_ms`; the timeout only
//! bounds stop latency, the loop is paced by the device. Each report becomes a frame
//! of exactly the device's max input report length.

use crate::backends::ControllerBackend;
use crate::codec::hid_frame;
use crate::config::ReaderConfig;
use crate::device::{
    BackendKind, DeviceDescriptor, DeviceId, UNKNOWN_MANUFACTURER, UNKNOWN_PRODUCT,
};
use crate::error::{ReaderError, Result};
use crate::event::ReaderEvent;
use crate::eventbus::EventBus;
use crate::report_descriptor::{ReportDescriptor, MAX_INPUT_REPORT_LEN};
use crate::session::{CancelToken, FrameSource, ReadOutcome, Worker};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Facts about one HID device, as reported by a [`HidHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidCandidate {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
    /// `0` when unknown.
    pub max_input_report_len: usize,
    /// Walked report descriptor, or why it could not be read.
    pub descriptor: std::result::Result<ReportDescriptor, String>,
}

impl HidCandidate {
    /// Build a candidate from raw descriptor bytes.
    ///
    /// The max input report length comes from the descriptor; a malformed descriptor
    /// still contributes the length learned before the bad item.
    pub fn from_descriptor_bytes(
        path: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        product: Option<String>,
        manufacturer: Option<String>,
        descriptor: std::result::Result<Vec<u8>, String>,
    ) -> Self {
        // A walker failure on one device must not take the whole listing down.
        let parsed = descriptor.and_then(|bytes| {
            catch_unwind(|| ReportDescriptor::parse(&bytes))
                .map_err(|_| "report descriptor walker panicked".to_string())
        });
        let (max_input_report_len, descriptor) = match parsed {
            Ok(Ok(d)) => (d.max_input_report_len(), Ok(d)),
            Ok(Err(e)) => (e.partial.max_input_report_len(), Err(e.to_string())),
            Err(e) => (0, Err(e)),
        };
        Self {
            path: path.into(),
            vendor_id,
            product_id,
            product,
            manufacturer,
            max_input_report_len,
            descriptor,
        }
    }

    fn to_descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId::Path(self.path.clone()),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            product_name: self
                .product
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
            manufacturer: self
                .manufacturer
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_MANUFACTURER.to_string()),
            backend: BackendKind::InterruptHid,
            max_report_len: self.max_input_report_len,
        }
    }
}

/// Decide whether a HID device is a game controller.
pub fn is_game_controller(candidate: &HidCandidate, fallback_max_report_len: usize) -> bool {
    let len = candidate.max_input_report_len;
    if len == 0 {
        return false;
    }
    match &candidate.descriptor {
        Ok(d) => d.declares_game_controller(),
        Err(_) => len > 1 && len <= fallback_max_report_len,
    }
}

/// Open HID device handle.
pub trait ReportStream: Send + 'static {
    /// Read one report into `buf`. `Ok(0)` means nothing arrived within `timeout`.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Platform HID access.
pub trait HidHost: Send + Sync + 'static {
    type Stream: ReportStream;

    /// Every HID device currently visible. Must not keep devices open.
    fn candidates(&self) -> Result<Vec<HidCandidate>>;

    /// Open a device for one session.
    fn open(&self, path: &str) -> Result<Self::Stream>;
}

struct HidSource<S> {
    stream: S,
    buf: Vec<u8>,
    report_len: usize,
    timeout: Duration,
}

impl<S: ReportStream> FrameSource for HidSource<S> {
    fn read(&mut self, _cancel: &CancelToken) -> ReadOutcome {
        match self.stream.read_timeout(&mut self.buf, self.timeout) {
            Ok(0) => ReadOutcome::Idle,
            Ok(n) => {
                trace!(n, "hid report");
                ReadOutcome::Data(hid_frame(&self.buf, n, self.report_len))
            }
            Err(e) => ReadOutcome::Fatal(e),
        }
    }
}

/// HID backend over any [`HidHost`].
pub struct HidBackend<H: HidHost> {
    host: H,
    bus: EventBus,
    worker: Worker,
    read_timeout: Duration,
    fallback_max_report_len: usize,
    disposed: bool,
}

impl<H: HidHost> HidBackend<H> {
    pub fn new(host: H, bus: EventBus, config: &ReaderConfig) -> Self {
        Self {
            host,
            worker: Worker::new("hid", bus.clone(), config.stop_grace()),
            bus,
            read_timeout: config.hid_read_timeout(),
            fallback_max_report_len: config.fallback_max_report_len,
            disposed: false,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn report(&self, device: Option<DeviceId>, error: ReaderError) {
        self.bus.publish(&ReaderEvent::Error { device, error });
    }
}

impl<H: HidHost> ControllerBackend for HidBackend<H> {
    fn kind(&self) -> BackendKind {
        BackendKind::InterruptHid
    }

    fn connected_controllers(&self) -> Vec<DeviceDescriptor> {
        let listed = catch_unwind(AssertUnwindSafe(|| self.host.candidates()))
            .unwrap_or_else(|_| Err(ReaderError::Enumeration("HID host panicked".into())));

        let candidates = match listed {
            Ok(c) => c,
            Err(e) => {
                let error = match e {
                    ReaderError::Enumeration(_) => e,
                    other => ReaderError::Enumeration(other.to_string()),
                };
                warn!(%error, "HID enumeration failed");
                self.report(None, error);
                return Vec::new();
            }
        };

        let total = candidates.len();
        let mut seen = HashSet::new();
        let out: Vec<DeviceDescriptor> = candidates
            .iter()
            .filter(|c| seen.insert(c.path.clone()))
            .filter(|c| is_game_controller(c, self.fallback_max_report_len))
            .map(HidCandidate::to_descriptor)
            .collect();
        debug!(total, accepted = out.len(), "HID devices enumerated");
        out
    }

    fn start_reading(&mut self, device: &DeviceDescriptor) -> Result<()> {
        if device.backend != BackendKind::InterruptHid {
            return Err(ReaderError::BackendMismatch {
                expected: BackendKind::InterruptHid,
                actual: device.backend,
            });
        }
        self.worker.stop();

        let unavailable = if self.disposed {
            Some("HID backend disposed".to_string())
        } else if device.path().is_none() {
            Some("HID descriptor without a device path".to_string())
        } else if device.max_report_len == 0 {
            Some("device reports no input".to_string())
        } else if device.max_report_len > MAX_INPUT_REPORT_LEN {
            Some(format!(
                "input report length {} exceeds {MAX_INPUT_REPORT_LEN}",
                device.max_report_len
            ))
        } else {
            None
        };
        if let Some(reason) = unavailable {
            let error = ReaderError::DeviceUnavailable(reason);
            self.report(Some(device.id.clone()), error.clone());
            return Err(error);
        }

        let path = device.path().unwrap_or_default();
        let stream = match self.host.open(path) {
            Ok(s) => s,
            Err(e) => {
                let error = match e {
                    ReaderError::DeviceUnavailable(_) => e,
                    other => ReaderError::DeviceUnavailable(other.to_string()),
                };
                warn!(path, %error, "cannot open HID device");
                self.report(Some(device.id.clone()), error.clone());
                return Err(error);
            }
        };

        let source = HidSource {
            stream,
            buf: vec![0u8; device.max_report_len],
            report_len: device.max_report_len,
            timeout: self.read_timeout,
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

#[cfg(feature = "hid")]
pub use self::hidapi_host::{HidapiHost, HidapiStream};

#[cfg(feature = "hid")]
mod hidapi_host {
    use super::{HidCandidate, HidHost, ReportStream};
    use crate::error::{ReaderError, Result};
    use hidapi::{HidApi, HidDevice};
    use std::ffi::CString;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    /// Largest report descriptor `hidapi` will hand back.
    const MAX_REPORT_DESCRIPTOR_SIZE: usize = 4096;

    /// [`HidHost`] backed by `hidapi`.
    pub struct HidapiHost {
        api: Mutex<HidApi>,
    }

    impl HidapiHost {
        pub fn new() -> Result<Self> {
            let api = HidApi::new().map_err(|e| ReaderError::Enumeration(e.to_string()))?;
            Ok(Self {
                api: Mutex::new(api),
            })
        }

        fn api(&self) -> MutexGuard<'_, HidApi> {
            self.api.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    fn read_descriptor(device: &HidDevice) -> std::result::Result<Vec<u8>, String> {
        let mut buf = vec![0u8; MAX_REPORT_DESCRIPTOR_SIZE];
        let n = device
            .get_report_descriptor(&mut buf)
            .map_err(|e| e.to_string())?;
        buf.truncate(n);
        Ok(buf)
    }

    impl HidHost for HidapiHost {
        type Stream = HidapiStream;

        fn candidates(&self) -> Result<Vec<HidCandidate>> {
            let mut api = self.api();
            api.refresh_devices()
                .map_err(|e| ReaderError::Enumeration(e.to_string()))?;

            let out = api
                .device_list()
                .map(|info| {
                    // The handle is dropped (closed) as soon as the descriptor is read.
                    let descriptor = info
                        .open_device(&api)
                        .map_err(|e| e.to_string())
                        .and_then(|dev| read_descriptor(&dev));
                    HidCandidate::from_descriptor_bytes(
                        info.path().to_string_lossy(),
                        info.vendor_id(),
                        info.product_id(),
                        info.product_string().map(str::to_owned),
                        info.manufacturer_string().map(str::to_owned),
                        descriptor,
                    )
                })
                .collect();
            Ok(out)
        }

        fn open(&self, path: &str) -> Result<HidapiStream> {
            let cpath = CString::new(path)
                .map_err(|_| ReaderError::DeviceUnavailable(format!("invalid path {path:?}")))?;
            let device = self
                .api()
                .open_path(&cpath)
                .map_err(|e| ReaderError::DeviceUnavailable(e.to_string()))?;
            Ok(HidapiStream { device })
        }
    }

    /// Open `hidapi` device handle.
    pub struct HidapiStream {
        device: HidDevice,
    }

    impl ReportStream for HidapiStream {
        fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            let ms = timeout.as_millis().min(i32::MAX as u128) as i32;
            self.device
                .read_timeout(buf, ms)
                .map_err(|e| ReaderError::ReadFailed(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_input::{VirtualHid, GAMEPAD_DESCRIPTOR, PEDALS_DESCRIPTOR};
    use crate::eventbus::EventFilter;
    use std::sync::{Arc, Mutex};

    /// Game Pad whose two Input items each declare 0xFFFFFFFF x 0xFFFFFFFF bits.
    const OVERSIZED_DESCRIPTOR: &[u8] = &[
        0x05, 0x01, 0x09, 0x05, 0xA1, 0x01, 0x77, 0xFF, 0xFF, 0xFF, 0xFF, 0x97, 0xFF, 0xFF,
        0xFF, 0xFF, 0x81, 0x02, 0x81, 0x02, 0xC0,
    ];

    fn candidate(descriptor: std::result::Result<Vec<u8>, String>) -> HidCandidate {
        HidCandidate::from_descriptor_bytes(
            "path",
            1,
            2,
            Some("Pad".into()),
            None,
            descriptor,
        )
    }

    #[test]
    fn gamepad_usage_is_accepted() {
        let c = candidate(Ok(GAMEPAD_DESCRIPTOR.to_vec()));
        assert_eq!(c.max_input_report_len, 6);
        assert!(is_game_controller(&c, 64));
    }

    #[test]
    fn readable_descriptor_beats_length_heuristic() {
        let mut c = candidate(Ok(PEDALS_DESCRIPTOR.to_vec()));
        c.max_input_report_len = 20;
        assert!(!is_game_controller(&c, 64));
    }

    #[test]
    fn unreadable_descriptor_falls_back_to_length() {
        let mut c = candidate(Err("access denied".into()));
        assert!(!is_game_controller(&c, 64));

        for (len, accepted) in [(1, false), (2, true), (20, true), (64, true), (65, false)] {
            c.max_input_report_len = len;
            assert_eq!(is_game_controller(&c, 64), accepted, "len {len}");
        }
    }

    #[test]
    fn malformed_descriptor_uses_fallback_with_partial_length() {
        let mut bytes = GAMEPAD_DESCRIPTOR[..22].to_vec();
        bytes.push(0x26);
        let c = candidate(Ok(bytes));
        assert!(c.descriptor.is_err());
        assert_eq!(c.max_input_report_len, 2);
        assert!(is_game_controller(&c, 64));
    }

    #[test]
    fn placeholders_for_missing_strings() {
        let mut c = candidate(Ok(GAMEPAD_DESCRIPTOR.to_vec()));
        c.product = None;
        c.manufacturer = Some(String::new());
        let d = c.to_descriptor();
        assert_eq!(d.product_name, UNKNOWN_PRODUCT);
        assert_eq!(d.manufacturer, UNKNOWN_MANUFACTURER);
        assert_eq!(d.backend, BackendKind::InterruptHid);
        assert_eq!(d.max_report_len, 6);
    }

    #[test]
    fn bad_descriptor_does_not_hide_other_devices() {
        let hid = VirtualHid::new();
        hid.attach_gamepad("good", 0x1234, 0x0001, "Good Pad");
        hid.attach(HidCandidate::from_descriptor_bytes(
            "bad",
            0x1234,
            0x0002,
            Some("Bad Pad".into()),
            None,
            Ok(OVERSIZED_DESCRIPTOR.to_vec()),
        ));
        let backend = HidBackend::new(hid, EventBus::new(), &ReaderConfig::default());

        let list = backend.connected_controllers();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path(), Some("good"));
    }

    #[test]
    fn oversized_report_length_is_refused() {
        let hid = VirtualHid::new();
        hid.attach_gamepad("pad", 0x1234, 0x0001, "Pad");
        let bus = EventBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        bus.subscribe(
            move |e: &ReaderEvent| sink.lock().unwrap().push(e.clone()),
            EventFilter::ErrorsOnly,
        );
        let mut backend = HidBackend::new(hid.clone(), bus, &ReaderConfig::default());

        let mut device = backend.connected_controllers().remove(0);
        device.max_report_len = usize::MAX / 8;
        assert!(matches!(
            backend.start_reading(&device),
            Err(ReaderError::DeviceUnavailable(_))
        ));
        assert!(!backend.is_reading());
        assert_eq!(hid.open_streams(), 0);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }
}
