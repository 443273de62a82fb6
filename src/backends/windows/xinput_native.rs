#![cfg(windows)]

//! Windows XInput binding.
//!
//! Thin wrapper over `XInputGetState` / `XInputGetCapabilities` implementing
//! [`XInputApi`]. Both calls are non-blocking, so a session's stop latency is bounded
//! by the poll interval alone.

use crate::backends::xinput::{ControllerSubtype, XInputApi};
use crate::codec::GamepadState;
use crate::error::{ReaderError, Result};
use windows_sys::Win32::Foundation::{ERROR_DEVICE_NOT_CONNECTED, ERROR_SUCCESS};
use windows_sys::Win32::UI::Input::XboxController::*;

/// Query any device type, not just gamepads.
const XINPUT_FLAG_ANY: u32 = 0;

/// XInput through the system `xinput1_4` library.
#[derive(Debug, Clone, Copy)]
pub struct NativeXInput {
    _priv: (),
}

impl NativeXInput {
    /// Returns `None` when the XInput service does not answer a plain state query.
    pub fn probe() -> Option<Self> {
        let api = Self { _priv: () };
        // FFI struct: must be manually zeroed
        let mut state: XINPUT_STATE = unsafe { std::mem::zeroed() };
        // NOTE: XInputGetState returns 0 on success.
        let res = unsafe { XInputGetState(0, &mut state) };
        (res == ERROR_SUCCESS || res == ERROR_DEVICE_NOT_CONNECTED).then_some(api)
    }
}

impl XInputApi for NativeXInput {
    fn state(&self, slot: u8) -> Result<GamepadState> {
        let mut state: XINPUT_STATE = unsafe { std::mem::zeroed() };
        let res = unsafe { XInputGetState(slot as u32, &mut state) };
        if res == ERROR_DEVICE_NOT_CONNECTED {
            return Err(ReaderError::Disconnected);
        }
        if res != ERROR_SUCCESS {
            return Err(ReaderError::ReadFailed(format!("XInputGetState error {res}")));
        }

        let gp = state.Gamepad;
        Ok(GamepadState {
            buttons: gp.wButtons as u16,
            left_trigger: gp.bLeftTrigger,
            right_trigger: gp.bRightTrigger,
            left_thumb_x: gp.sThumbLX,
            left_thumb_y: gp.sThumbLY,
            right_thumb_x: gp.sThumbRX,
            right_thumb_y: gp.sThumbRY,
        })
    }

    fn subtype(&self, slot: u8) -> Option<ControllerSubtype> {
        let mut caps: XINPUT_CAPABILITIES = unsafe { std::mem::zeroed() };
        let res = unsafe { XInputGetCapabilities(slot as u32, XINPUT_FLAG_ANY as _, &mut caps) };
        (res == ERROR_SUCCESS).then(|| ControllerSubtype::from_raw(caps.SubType as u8))
    }
}
