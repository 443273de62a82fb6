//! Frame codec.
//!
//! Converts backend-native reports into [`Frame`]s.
//!
//! ## HID
//! Bytes are copied verbatim into a frame of the device's maximum input report
//! length; a short read is zero-padded, nothing is reinterpreted.
//!
//! ## XInput (12-byte layout)
//! Consumers may depend on this layout:
//!
//! | bytes | field | encoding |
//! |---|---|---|
//! | 0–1 | button bitmask | `u16` little-endian |
//! | 2 | left trigger | `u8` |
//! | 3 | right trigger | `u8` |
//! | 4–5 | left stick X | `i16` little-endian |
//! | 6–7 | left stick Y | `i16` little-endian |
//! | 8–9 | right stick X | `i16` little-endian |
//! | 10–11 | right stick Y | `i16` little-endian |

use crate::frame::Frame;

/// Length of every frame produced by the polled backend.
pub const POLLED_FRAME_LEN: usize = 12;

/// Raw XInput gamepad state, as reported by `XInputGetState`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GamepadState {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_thumb_x: i16,
    pub left_thumb_y: i16,
    pub right_thumb_x: i16,
    pub right_thumb_y: i16,
}

impl GamepadState {
    /// Pack into the 12-byte layout.
    pub fn encode(&self) -> [u8; POLLED_FRAME_LEN] {
        let mut out = [0u8; POLLED_FRAME_LEN];
        out[0..2].copy_from_slice(&self.buttons.to_le_bytes());
        out[2] = self.left_trigger;
        out[3] = self.right_trigger;
        out[4..6].copy_from_slice(&self.left_thumb_x.to_le_bytes());
        out[6..8].copy_from_slice(&self.left_thumb_y.to_le_bytes());
        out[8..10].copy_from_slice(&self.right_thumb_x.to_le_bytes());
        out[10..12].copy_from_slice(&self.right_thumb_y.to_le_bytes());
        out
    }

    /// Unpack a frame laid out by [`GamepadState::encode`].
    ///
    /// Missing bytes read as zero, so a short frame decodes to a partially zeroed state.
    pub fn decode(frame: &Frame) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([frame.get(i), frame.get(i + 1)]);
        let i16_at = |i: usize| i16::from_le_bytes([frame.get(i), frame.get(i + 1)]);
        Self {
            buttons: u16_at(0),
            left_trigger: frame.get(2),
            right_trigger: frame.get(3),
            left_thumb_x: i16_at(4),
            left_thumb_y: i16_at(6),
            right_thumb_x: i16_at(8),
            right_thumb_y: i16_at(10),
        }
    }
}

/// Frame for one XInput state sample.
pub fn polled_frame(state: &GamepadState) -> Frame {
    Frame::new(&state.encode())
}

/// Frame for one HID read: the first `read` bytes of `buf`, sized to `report_len`.
pub fn hid_frame(buf: &[u8], read: usize, report_len: usize) -> Frame {
    let n = read.min(buf.len());
    Frame::with_length(&buf[..n], report_len)
}
