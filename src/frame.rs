//! Fixed-length report snapshots.
//!
//! A [`Frame`] is an **owned**, read-only copy of one controller report plus the time
//! it was captured. Its length is fixed at construction:
//! - the device's maximum input report length for HID devices,
//! - exactly [`POLLED_FRAME_LEN`](crate::codec::POLLED_FRAME_LEN) bytes for XInput devices.
//!
//! Cloning is cheap (the bytes are shared behind an `Arc`), which makes fan-out to
//! several subscribers free of copies. Nobody can mutate a delivered frame; a
//! consumer that wants to keep bytes around should copy them with [`Frame::to_vec`].
//!
//! # Safe indexing
//! [`Frame::get`] returns `0` for any index past the end instead of panicking, so
//! consumers that render a fixed grid of bytes never need to bounds-check.
//!
//! ```
//! use padscope::Frame;
//!
//! let f = Frame::new(&[0x12, 0x80]);
//! assert_eq!(f.get(1), 0x80);
//! assert_eq!(f.get(99), 0);
//! assert_eq!(f.hex(1), "0x80");
//! assert_eq!(f.binary(1), "10000000");
//! ```

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable byte snapshot of one controller report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    captured_at: SystemTime,
    bytes: Arc<[u8]>,
}

impl Frame {
    /// Copy `data` verbatim, stamped with the current time.
    pub fn new(data: &[u8]) -> Self {
        Self {
            captured_at: SystemTime::now(),
            bytes: Arc::from(data),
        }
    }

    /// Build a frame of exactly `len` bytes: `data` is truncated or zero-padded to fit.
    pub fn with_length(data: &[u8], len: usize) -> Self {
        let mut buf = vec![0u8; len];
        let n = data.len().min(len);
        buf[..n].copy_from_slice(&data[..n]);
        Self {
            captured_at: SystemTime::now(),
            bytes: Arc::from(buf),
        }
    }

    /// A zero-length frame.
    pub fn empty() -> Self {
        Self::new(&[])
    }

    /// Capture time.
    #[inline]
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at `index`, or `0` when `index` is out of range.
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        self.bytes.get(index).copied().unwrap_or(0)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Owned copy of the bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// `"0xNN"` rendering of the byte at `index`.
    pub fn hex(&self, index: usize) -> String {
        format!("0x{:02X}", self.get(index))
    }

    /// Eight-character MSB-first binary rendering of the byte at `index`.
    pub fn binary(&self, index: usize) -> String {
        format!("{:08b}", self.get(index))
    }

    /// Bits of the byte at `index`, MSB first.
    pub fn bits(&self, index: usize) -> [bool; 8] {
        let v = self.get(index);
        let mut out = [false; 8];
        for (i, bit) in out.iter_mut().enumerate() {
            *bit = v & (0x80 >> i) != 0;
        }
        out
    }

    /// Indices whose value differs from `previous` (compared up to this frame's length).
    pub fn changed_indices(&self, previous: &Frame) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.get(i) != previous.get(i))
            .collect()
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = self
            .captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut s = serializer.serialize_struct("Frame", 2)?;
        s.serialize_field("captured_at_ms", &millis)?;
        s.serialize_field("bytes", &*self.bytes)?;
        s.end()
    }
}
