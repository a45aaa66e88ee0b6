//! Battery level debouncing.
//!
//! Turns raw probe outcomes into a stable battery level. A failed read first
//! borrows the level of the device's wired/wireless counterpart if that one is
//! known; otherwise up to `skip_threshold` consecutive failures are absorbed
//! without changing the level, and only the next one drops it to unknown.

use crate::probe::ProbeOutcome;
use serde::Serialize;

/// Public battery level value meaning "unknown".
pub const LEVEL_UNKNOWN: i32 = -1;

/// Debounced battery state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BatteryState {
    #[default]
    Unknown,
    /// Charge percentage, always 0-100.
    Known(u8),
}

impl BatteryState {
    /// Level as exposed to the UI: -1 or 0-100.
    pub fn level(&self) -> i32 {
        match self {
            Self::Unknown => LEVEL_UNKNOWN,
            Self::Known(l) => i32::from(*l),
        }
    }

    pub fn known(&self) -> Option<u8> {
        match self {
            Self::Unknown => None,
            Self::Known(l) => Some(*l),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// Per-device debounce state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debouncer {
    state: BatteryState,
    skip_count: u32,
    skip_threshold: u32,
}

impl Debouncer {
    pub fn new(skip_threshold: u32) -> Self {
        Self {
            state: BatteryState::Unknown,
            skip_count: 0,
            skip_threshold,
        }
    }

    pub fn state(&self) -> BatteryState {
        self.state
    }

    pub fn skip_count(&self) -> u32 {
        self.skip_count
    }

    pub fn skip_threshold(&self) -> u32 {
        self.skip_threshold
    }

    /// Feed one poll outcome.
    ///
    /// `alternative` is the counterpart device's current state, if it is
    /// tracked. Returns the new state.
    pub fn apply(
        &mut self,
        outcome: ProbeOutcome,
        alternative: Option<BatteryState>,
    ) -> BatteryState {
        match outcome {
            ProbeOutcome::Level(level) => {
                self.state = BatteryState::Known(level.min(100));
                self.skip_count = 0;
            }
            ProbeOutcome::Failed => {
                if let Some(BatteryState::Known(alt_level)) = alternative {
                    // Borrowed level; own skip counter is left as is.
                    self.state = BatteryState::Known(alt_level);
                } else if self.skip_count < self.skip_threshold {
                    self.skip_count += 1;
                } else {
                    self.skip_count = 0;
                    self.state = BatteryState::Unknown;
                }
            }
        }
        self.state
    }
}
