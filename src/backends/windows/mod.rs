#![cfg(windows)]

//! Windows-only platform bindings.
//!
//! - **XInput** state and capability queries via `windows-sys`
//!
//! Most users should not touch these directly; [`probe_backends`](crate::backends::probe_backends)
//! wires them into a [`Router`](crate::router::Router).

pub mod xinput_native;

pub use xinput_native::NativeXInput;
