//! Error taxonomy.
//!
//! Errors are `Clone` because one failure is fanned out to every error subscriber.
//! Read timeouts and cancellation are not errors and never show up here.

use crate::device::BackendKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    /// Listing devices failed; the enumeration call returned an empty list.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// No backend for this kind on this platform, or the device could not be opened.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A descriptor was handed to a backend that cannot open it.
    #[error("descriptor belongs to the {actual} backend, not {expected}")]
    BackendMismatch {
        expected: BackendKind,
        actual: BackendKind,
    },

    /// Irrecoverable I/O failure during a session.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The device went away during a session.
    #[error("controller disconnected")]
    Disconnected,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ReaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_names_both_backends() {
        let e = ReaderError::BackendMismatch {
            expected: BackendKind::PolledNative,
            actual: BackendKind::InterruptHid,
        };
        assert_eq!(
            e.to_string(),
            "descriptor belongs to the hid backend, not xinput"
        );
    }
}
