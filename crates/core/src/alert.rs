//! Low-battery alerts and display helpers for the UI layer.
//!
//! Alert policy: every device starts with a 15% threshold. When a known level
//! is at or below the device's threshold an alert fires and the threshold
//! drops to the next multiple of 5 below the level, so a draining device
//! alerts again at 10%, 5%, and so on rather than on every evaluation. At
//! most one alert is produced per evaluation, for the lowest-charged device.
//! Charging above the starting threshold re-arms the device.

use crate::catalog::DeviceKey;
use crate::debounce::LEVEL_UNKNOWN;
use crate::monitor::DeviceSnapshot;
use std::collections::HashMap;
use tracing::debug;

pub const STARTING_THRESHOLD: i32 = 15;
pub const THRESHOLD_STEP: i32 = 5;

/// A device whose battery crossed its alert threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowBatteryAlert {
    pub device: DeviceSnapshot,
}

impl LowBatteryAlert {
    pub fn message(&self) -> String {
        format!(
            "{} is at {}",
            self.device.display_name,
            format_level(self.device.battery_level)
        )
    }
}

/// Per-device alert thresholds.
#[derive(Debug, Default)]
pub struct LowBatteryAlerts {
    thresholds: HashMap<DeviceKey, i32>,
}

impl LowBatteryAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current threshold of a device, once it has been evaluated.
    pub fn threshold(&self, key: DeviceKey) -> Option<i32> {
        self.thresholds.get(&key).copied()
    }

    /// Check the current levels and return at most one alert.
    pub fn evaluate(&mut self, devices: &[DeviceSnapshot]) -> Option<LowBatteryAlert> {
        for device in devices {
            let threshold = self
                .thresholds
                .entry(device.key())
                .or_insert(STARTING_THRESHOLD);
            if device.battery_level > STARTING_THRESHOLD {
                *threshold = STARTING_THRESHOLD;
            }
        }

        let mut by_level: Vec<&DeviceSnapshot> = devices
            .iter()
            .filter(|d| d.battery_level != LEVEL_UNKNOWN)
            .collect();
        by_level.sort_by_key(|d| d.battery_level);

        for device in by_level {
            let threshold = self
                .thresholds
                .entry(device.key())
                .or_insert(STARTING_THRESHOLD);
            if device.battery_level <= *threshold {
                *threshold = next_threshold(device.battery_level);
                debug!(
                    name = device.display_name,
                    level = device.battery_level,
                    next_threshold = *threshold,
                    "Low battery alert"
                );
                return Some(LowBatteryAlert {
                    device: device.clone(),
                });
            }
        }
        None
    }
}

fn next_threshold(level: i32) -> i32 {
    if level <= 0 {
        -1
    } else {
        (level - 1) / THRESHOLD_STEP * THRESHOLD_STEP
    }
}

/// "?" for an unknown level, "57%" otherwise.
pub fn format_level(level: i32) -> String {
    if level == LEVEL_UNKNOWN {
        "?".to_string()
    } else {
        format!("{level}%")
    }
}

/// The device with the lowest level. Unknown levels sort first.
pub fn lowest_charge(devices: &[DeviceSnapshot]) -> Option<&DeviceSnapshot> {
    devices.iter().min_by_key(|d| d.battery_level)
}

/// Coarse charge bucket for icon selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryBucket {
    Full,
    ThreeQuarters,
    Half,
    Quarter,
    Empty,
    Unknown,
}

impl BatteryBucket {
    pub fn from_level(level: i32) -> Self {
        match level {
            90.. => Self::Full,
            65..=89 => Self::ThreeQuarters,
            40..=64 => Self::Half,
            15..=39 => Self::Quarter,
            0..=14 => Self::Empty,
            _ => Self::Unknown,
        }
    }
}
