//! Read raw input reports from game controllers.
//!
//! Two access paths sit behind one [`Router`]: interrupt-driven HID reads and
//! polled XInput slots. Each report arrives as a [`Frame`] through the shared
//! [`EventBus`].

pub mod backends;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod filtered_listener;
pub mod frame;
pub mod logger;
pub mod report_descriptor;
pub mod router;
pub mod session;

pub use codec::GamepadState;
pub use config::ReaderConfig;
pub use device::*;
pub use error::{ReaderError, Result};
pub use event::*;
pub use eventbus::{EventBus, EventFilter, ReaderListener, SubscriptionId};
pub use filtered_listener::FilteredListener;
pub use frame::Frame;
pub use logger::LogListener;
pub use router::Router;
