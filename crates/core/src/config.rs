//! Monitor tunables and their validation.
//!
//! # Defaults
//! - **Refresh interval**: 120 s between battery reads of one device
//! - **Skip threshold**: 3 consecutive failed reads absorbed before the level
//!   drops to unknown
//! - **Rescan interval**: 60 s between USB bus enumerations
//!
//! # Bounds
//! Both intervals must be at least 1 s. The skip threshold may be 0 (no
//! absorption) and is capped at 100.

use crate::error::{Error, Result};
use std::time::Duration;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_SKIP_THRESHOLD: u32 = 3;
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(60);

pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_SKIP_THRESHOLD: u32 = 100;

/// Timing and debounce settings for a [`DeviceMonitor`](crate::monitor::DeviceMonitor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between battery reads of one device.
    pub refresh_interval: Duration,
    /// Consecutive failures absorbed before the level becomes unknown.
    pub skip_threshold: u32,
    /// Time between USB bus enumerations.
    pub rescan_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            skip_threshold: DEFAULT_SKIP_THRESHOLD,
            rescan_interval: DEFAULT_RESCAN_INTERVAL,
        }
    }
}

impl MonitorConfig {
    /// Build a config from whole-second CLI values.
    pub fn from_secs(refresh_secs: u64, skip_threshold: u32, rescan_secs: u64) -> Result<Self> {
        let config = Self {
            refresh_interval: Duration::from_secs(refresh_secs),
            skip_threshold,
            rescan_interval: Duration::from_secs(rescan_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its bounds.
    ///
    /// The skip threshold cap of [`MAX_SKIP_THRESHOLD`] is a sanity limit:
    /// at the default refresh interval it already keeps a stale level for
    /// over three hours.
    pub fn validate(&self) -> Result<()> {
        validate_interval("refresh_interval", self.refresh_interval)?;
        validate_interval("rescan_interval", self.rescan_interval)?;
        if self.skip_threshold > MAX_SKIP_THRESHOLD {
            return Err(Error::OutOfRange {
                field: "skip_threshold",
                value: u64::from(self.skip_threshold),
                min: 0,
                max: u64::from(MAX_SKIP_THRESHOLD),
            });
        }
        Ok(())
    }
}

fn validate_interval(field: &'static str, interval: Duration) -> Result<()> {
    if interval < MIN_INTERVAL {
        return Err(Error::OutOfRange {
            field,
            value: interval.as_millis() as u64,
            min: MIN_INTERVAL.as_millis() as u64,
            max: u64::MAX,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_interval, Duration::from_secs(120));
        assert_eq!(config.skip_threshold, 3);
        assert_eq!(config.rescan_interval, Duration::from_secs(60));
    }

    #[test]
    fn from_secs_accepts_minimums() {
        let config = MonitorConfig::from_secs(1, 0, 1).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.skip_threshold, 0);
    }

    #[test]
    fn rejects_sub_second_refresh() {
        let config = MonitorConfig {
            refresh_interval: Duration::from_millis(500),
            ..MonitorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::OutOfRange {
                field: "refresh_interval",
                ..
            })
        ));
        assert!(MonitorConfig::from_secs(0, 3, 60).is_err());
    }

    #[test]
    fn rejects_zero_rescan() {
        assert!(MonitorConfig::from_secs(120, 3, 0).is_err());
    }

    #[test]
    fn rejects_huge_skip_threshold() {
        assert!(MonitorConfig::from_secs(120, 101, 60).is_err());
        assert!(matches!(
            MonitorConfig::from_secs(120, 200, 60),
            Err(Error::OutOfRange {
                field: "skip_threshold",
                value: 200,
                max: 100,
                ..
            })
        ));
        assert!(MonitorConfig::from_secs(120, 100, 60).is_ok());
    }
}
