//! Battery probe capability and failure classification.
//!
//! A probe performs one battery read for one device model and reports either
//! a level or a failure. Every error raised while talking to hardware stops
//! at this boundary: it is classified, logged, and turned into
//! [`ProbeOutcome::Failed`].

use crate::asus::{self, AsusTarget};
use crate::catalog::{DeviceDescriptor, Protocol};
use crate::error::{Error, Result};
use crate::razer;
use std::sync::Mutex;
use tracing::debug;

/// Result of a single battery read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Battery percentage, 0-100.
    Level(u8),
    Failed,
}

impl ProbeOutcome {
    pub fn level(&self) -> Option<u8> {
        match self {
            Self::Level(l) => Some(*l),
            Self::Failed => None,
        }
    }
}

/// Something that can attempt a battery read for a catalog device.
pub trait BatteryProbe: Send + Sync {
    /// Attempt one battery read. Blocks for the duration of the exchange.
    fn read_battery(&self, descriptor: &DeviceDescriptor) -> ProbeOutcome;
}

/// Classification of probe errors, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No HID interface or USB handle matches the descriptor.
    DeviceNotFound,
    /// Read or control transfer exceeded its timeout.
    TransportTimeout,
    /// Wrong length or unexpected status/echo byte.
    MalformedResponse,
    /// Any other HID/USB layer failure.
    Transport,
}

impl FailureKind {
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::DeviceNotFound(_) => Self::DeviceNotFound,
            Error::Timeout(_) => Self::TransportTimeout,
            Error::MalformedResponse(_) => Self::MalformedResponse,
            Error::Hid(msg) | Error::Usb(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    Self::TransportTimeout
                } else if lower.contains("not found")
                    || lower.contains("no such device")
                    || lower.contains("disconnect")
                {
                    Self::DeviceNotFound
                } else {
                    Self::Transport
                }
            }
            Error::OutOfRange { .. } => Self::MalformedResponse,
        }
    }
}

/// Collapse a protocol result into an outcome, logging the failure cause.
pub fn settle_outcome(descriptor: &DeviceDescriptor, result: Result<u8>) -> ProbeOutcome {
    match result {
        Ok(level) => {
            debug!(name = descriptor.display_name, level, "Battery read succeeded");
            ProbeOutcome::Level(level)
        }
        Err(e) => {
            debug!(
                name = descriptor.display_name,
                kind = ?FailureKind::classify(&e),
                error = %e,
                "Battery read failed"
            );
            ProbeOutcome::Failed
        }
    }
}

/// Probe that talks to real hardware, choosing the vendor protocol from the
/// descriptor.
///
/// The hidapi context is created on first use and reused afterwards; Asus
/// reads are serialised on it.
#[derive(Default)]
pub struct HardwareProbe {
    hid: Mutex<Option<hidapi::HidApi>>,
}

impl HardwareProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn query_asus(&self, target: &AsusTarget) -> Result<u8> {
        let mut guard = self
            .hid
            .lock()
            .map_err(|_| Error::Hid("hidapi context lock poisoned".into()))?;
        if guard.is_none() {
            *guard = Some(hidapi::HidApi::new()?);
        }
        match guard.as_mut() {
            Some(api) => asus::query_battery(api, target),
            None => Err(Error::Hid("hidapi context unavailable".into())),
        }
    }
}

impl BatteryProbe for HardwareProbe {
    fn read_battery(&self, descriptor: &DeviceDescriptor) -> ProbeOutcome {
        let result = match descriptor.protocol {
            Protocol::AsusHid { usage_page, usage } => self.query_asus(&AsusTarget {
                key: descriptor.key,
                usage_page,
                usage,
            }),
            Protocol::RazerUsb { transaction_id } => {
                razer::query_battery(descriptor.key, transaction_id)
            }
        };
        settle_outcome(descriptor, result)
    }
}

/// A scripted probe for testing.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::catalog::DeviceKey;
    use std::collections::{HashMap, VecDeque};

    /// Returns queued outcomes per device, then a per-device default.
    #[derive(Default)]
    pub struct ScriptedProbe {
        queued: Mutex<HashMap<DeviceKey, VecDeque<ProbeOutcome>>>,
        defaults: Mutex<HashMap<DeviceKey, ProbeOutcome>>,
        calls: Mutex<HashMap<DeviceKey, usize>>,
    }

    impl ScriptedProbe {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue outcomes returned by the next reads of `key`.
        pub fn push(&self, key: DeviceKey, outcomes: &[ProbeOutcome]) {
            self.queued
                .lock()
                .unwrap()
                .entry(key)
                .or_default()
                .extend(outcomes.iter().copied());
        }

        /// Outcome returned once the queue for `key` is empty.
        pub fn set_default(&self, key: DeviceKey, outcome: ProbeOutcome) {
            self.defaults.lock().unwrap().insert(key, outcome);
        }

        pub fn calls(&self, key: DeviceKey) -> usize {
            self.calls.lock().unwrap().get(&key).copied().unwrap_or(0)
        }
    }

    impl BatteryProbe for ScriptedProbe {
        fn read_battery(&self, descriptor: &DeviceDescriptor) -> ProbeOutcome {
            *self.calls.lock().unwrap().entry(descriptor.key).or_default() += 1;
            let queued = self
                .queued
                .lock()
                .unwrap()
                .get_mut(&descriptor.key)
                .and_then(|q| q.pop_front());
            queued.unwrap_or_else(|| {
                self.defaults
                    .lock()
                    .unwrap()
                    .get(&descriptor.key)
                    .copied()
                    .unwrap_or(ProbeOutcome::Failed)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    #[test]
    fn classify_typed_errors() {
        assert_eq!(
            FailureKind::classify(&Error::DeviceNotFound("x".into())),
            FailureKind::DeviceNotFound
        );
        assert_eq!(
            FailureKind::classify(&Error::Timeout("250ms".into())),
            FailureKind::TransportTimeout
        );
        assert_eq!(
            FailureKind::classify(&Error::MalformedResponse("short".into())),
            FailureKind::MalformedResponse
        );
    }

    #[test]
    fn classify_transport_messages() {
        assert_eq!(
            FailureKind::classify(&Error::Hid("read_timeout: timed out".into())),
            FailureKind::TransportTimeout
        );
        assert_eq!(
            FailureKind::classify(&Error::Usb("No such device (it may have been disconnected)".into())),
            FailureKind::DeviceNotFound
        );
        assert_eq!(
            FailureKind::classify(&Error::Usb("Pipe error".into())),
            FailureKind::Transport
        );
    }

    #[test]
    fn settle_outcome_maps_errors_to_failure() {
        let desc = &catalog::all()[0];
        assert_eq!(settle_outcome(desc, Ok(42)), ProbeOutcome::Level(42));
        assert_eq!(
            settle_outcome(desc, Err(Error::Timeout("x".into()))),
            ProbeOutcome::Failed
        );
    }

    #[test]
    fn scripted_probe_replays_queue_then_default() {
        let probe = mock::ScriptedProbe::new();
        let desc = &catalog::all()[0];
        probe.push(desc.key, &[ProbeOutcome::Level(10), ProbeOutcome::Failed]);
        probe.set_default(desc.key, ProbeOutcome::Level(99));

        assert_eq!(probe.read_battery(desc), ProbeOutcome::Level(10));
        assert_eq!(probe.read_battery(desc), ProbeOutcome::Failed);
        assert_eq!(probe.read_battery(desc), ProbeOutcome::Level(99));
        assert_eq!(probe.calls(desc.key), 3);
    }
}
