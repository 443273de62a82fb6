//! Reader configuration.
//!
//! All fields have defaults, so an empty TOML document is a valid configuration:
//!
//! ```toml
//! hid_read_timeout_ms = 100
//! poll_interval_ms = 16
//! stop_grace_ms = 1000
//! fallback_max_report_len = 64
//! ```

use crate::error::{ReaderError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    /// Upper bound on one blocking HID read. Also bounds stop latency on that path.
    pub hid_read_timeout_ms: u64,
    /// Delay between XInput state queries (~60 Hz by default).
    pub poll_interval_ms: u64,
    /// How long Stop waits for a loop to exit before proceeding anyway.
    pub stop_grace_ms: u64,
    /// HID devices with an unreadable descriptor are accepted when their max input
    /// report length is in `2..=fallback_max_report_len`.
    pub fallback_max_report_len: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            hid_read_timeout_ms: 100,
            poll_interval_ms: 16,
            stop_grace_ms: 1000,
            fallback_max_report_len: 64,
        }
    }
}

impl ReaderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ReaderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would turn a read loop into a busy spin.
    pub fn validate(&self) -> Result<()> {
        if self.hid_read_timeout_ms == 0 {
            return Err(ReaderError::Config("hid_read_timeout_ms must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ReaderError::Config("poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReaderError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    #[inline]
    pub fn hid_read_timeout(&self) -> Duration {
        Duration::from_millis(self.hid_read_timeout_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(ReaderConfig::from_toml_str("").unwrap(), ReaderConfig::default());
    }

    #[test]
    fn partial_override() {
        let c = ReaderConfig::from_toml_str("poll_interval_ms = 8\n").unwrap();
        assert_eq!(c.poll_interval(), Duration::from_millis(8));
        assert_eq!(c.stop_grace(), Duration::from_secs(1));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ReaderConfig::from_toml_str("pol_interval_ms = 8\n").unwrap_err();
        assert!(matches!(err, ReaderError::Config(_)));
    }

    #[test]
    fn zero_timings_are_rejected() {
        for doc in ["hid_read_timeout_ms = 0\n", "poll_interval_ms = 0\n"] {
            let err = ReaderConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, ReaderError::Config(_)), "{doc}");
        }
        assert!(ReaderConfig::from_toml_str("stop_grace_ms = 0\n").is_ok());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hid_read_timeout_ms = 50").unwrap();
        let c = ReaderConfig::load(file.path()).unwrap();
        assert_eq!(c.hid_read_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReaderConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ReaderError::Config(_)));
    }
}
