//! Device bus scanner and per-device battery polling.
//!
//! [`DeviceMonitor`] periodically enumerates the USB bus, tracks every
//! attached device that appears in the catalog, and runs one polling task per
//! tracked device. Each poll performs a blocking battery read off the async
//! executor and feeds the outcome to the device's [`Debouncer`].
//!
//! The tracked-device set is written only by the scanner. Poll tasks read it
//! to resolve a device's wired/wireless counterpart when their own read fails.
//! A device's poll task, and any manual refresh in flight, is always awaited
//! before the device is removed from the set. Later polls of a removed device
//! do nothing.

use crate::catalog::{self, DeviceDescriptor, DeviceKey, DeviceType};
use crate::config::MonitorConfig;
use crate::debounce::{BatteryState, Debouncer};
use crate::error::{Error, Result};
use crate::probe::{BatteryProbe, HardwareProbe, ProbeOutcome};
use crate::transport::{RusbBus, UsbAddress, UsbBus, UsbDeviceEntry};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A catalog device currently attached to the bus.
#[derive(Debug)]
pub struct TrackedDevice {
    descriptor: &'static DeviceDescriptor,
    address: UsbAddress,
    debouncer: std::sync::Mutex<Debouncer>,
    /// Held for the whole of one poll so polls of this device never overlap.
    poll_lock: Mutex<()>,
    /// Set under `poll_lock` once the device has left the bus.
    removed: AtomicBool,
}

impl TrackedDevice {
    fn new(descriptor: &'static DeviceDescriptor, address: UsbAddress, skip_threshold: u32) -> Self {
        Self {
            descriptor,
            address,
            debouncer: std::sync::Mutex::new(Debouncer::new(skip_threshold)),
            poll_lock: Mutex::new(()),
            removed: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &'static DeviceDescriptor {
        self.descriptor
    }

    pub fn key(&self) -> DeviceKey {
        self.descriptor.key
    }

    pub fn address(&self) -> UsbAddress {
        self.address
    }

    pub fn battery(&self) -> BatteryState {
        self.debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    pub fn skip_count(&self) -> u32 {
        self.debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .skip_count()
    }

    fn apply(&self, outcome: ProbeOutcome, alternative: Option<BatteryState>) -> BatteryState {
        self.debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(outcome, alternative)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot::new(self.descriptor, self.address, self.battery())
    }
}

/// Point-in-time view of a tracked device, as handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub display_name: &'static str,
    pub manufacturer_name: &'static str,
    pub device_type: DeviceType,
    pub vendor_id: u16,
    pub product_id: u16,
    pub address: UsbAddress,
    /// -1 when unknown, otherwise 0-100.
    pub battery_level: i32,
}

impl DeviceSnapshot {
    pub fn new(
        descriptor: &DeviceDescriptor,
        address: UsbAddress,
        battery: BatteryState,
    ) -> Self {
        Self {
            display_name: descriptor.display_name,
            manufacturer_name: descriptor.manufacturer_name(),
            device_type: descriptor.device_type,
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            address,
            battery_level: battery.level(),
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.vendor_id, self.product_id)
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A supported device appeared on the bus and is now polled.
    Added(DeviceSnapshot),
    /// A tracked device left the bus; its polling has stopped.
    Removed(DeviceSnapshot),
    /// A poll completed. Fires on every poll, changed or not.
    BatteryLevelChanged(DeviceSnapshot),
}

/// What one bus scan changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub added: Vec<DeviceKey>,
    pub removed: Vec<DeviceKey>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

type DeviceSet = Arc<RwLock<Vec<Arc<TrackedDevice>>>>;

/// Everything a poll task needs. Cheap to clone.
#[derive(Clone)]
struct PollContext {
    probe: Arc<dyn BatteryProbe>,
    devices: DeviceSet,
    events: broadcast::Sender<DeviceEvent>,
}

/// A running periodic task with its stop signal.
struct PeriodicTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Signal the task and wait for it to exit. An execution already in
    /// progress is allowed to finish first.
    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Periodic task ended abnormally");
        }
    }
}

struct Shared {
    config: MonitorConfig,
    bus: Arc<dyn UsbBus>,
    ctx: PollContext,
    /// Poll tasks by device key. Locked for the whole of a scan, which also
    /// keeps scans from interleaving.
    pollers: Mutex<HashMap<DeviceKey, PeriodicTask>>,
}

/// Scans the bus and keeps battery levels of supported devices up to date.
pub struct DeviceMonitor {
    shared: Arc<Shared>,
    scanner: Mutex<Option<PeriodicTask>>,
}

impl DeviceMonitor {
    /// Create a monitor over the given bus and probe.
    pub fn new(
        config: MonitorConfig,
        bus: Arc<dyn UsbBus>,
        probe: Arc<dyn BatteryProbe>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                bus,
                ctx: PollContext {
                    probe,
                    devices: Arc::new(RwLock::new(Vec::new())),
                    events,
                },
                pollers: Mutex::new(HashMap::new()),
            }),
            scanner: Mutex::new(None),
        })
    }

    /// Create a monitor that talks to real USB and HID devices.
    pub fn with_hardware(config: MonitorConfig) -> Result<Self> {
        Self::new(config, Arc::new(RusbBus), Arc::new(HardwareProbe::new()))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Receive add/remove/battery events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.ctx.events.subscribe()
    }

    /// Start periodic bus scanning. The first scan runs immediately.
    ///
    /// Calling this while already running does nothing.
    pub async fn start(&self) {
        let mut scanner = self.scanner.lock().await;
        if scanner.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(shared.config.rescan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scan(&shared).await {
                            warn!(error = %e, "USB bus scan failed, retrying next interval");
                        }
                    }
                }
            }
            debug!("Bus scanner stopped");
        });

        info!(
            rescan_secs = self.shared.config.rescan_interval.as_secs(),
            refresh_secs = self.shared.config.refresh_interval.as_secs(),
            skip_threshold = self.shared.config.skip_threshold,
            "Device monitor started"
        );
        *scanner = Some(PeriodicTask {
            stop: stop_tx,
            handle,
        });
    }

    /// Stop the scanner and every poll task, waiting for each to exit.
    ///
    /// Tracked devices stay in the set with their last known levels.
    pub async fn shutdown(&self) {
        if let Some(task) = self.scanner.lock().await.take() {
            task.stop().await;
        }

        let mut pollers = self.shared.pollers.lock().await;
        for (key, task) in pollers.drain() {
            debug!(device = %key, "Stopping battery polling");
            task.stop().await;
        }
        info!("Device monitor stopped");
    }

    /// Run one bus scan now.
    pub async fn scan_once(&self) -> Result<ScanReport> {
        scan(&self.shared).await
    }

    /// Poll one tracked device now. Returns its new state, or `None` if the
    /// device is not tracked or is removed before the poll starts.
    pub async fn refresh_now(&self, key: DeviceKey) -> Option<BatteryState> {
        let device = find_tracked(&self.shared.ctx.devices, key).await?;
        poll_device(&self.shared.ctx, &device).await
    }

    /// Ordered snapshot of the tracked devices.
    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        self.shared
            .ctx
            .devices
            .read()
            .await
            .iter()
            .map(|d| d.snapshot())
            .collect()
    }

    /// Current battery state of a tracked device.
    pub async fn battery(&self, key: DeviceKey) -> Option<BatteryState> {
        find_tracked(&self.shared.ctx.devices, key)
            .await
            .map(|d| d.battery())
    }

    /// Whether a device currently has a running poll task.
    pub async fn is_polling(&self, key: DeviceKey) -> bool {
        self.shared.pollers.lock().await.contains_key(&key)
    }
}

async fn find_tracked(devices: &DeviceSet, key: DeviceKey) -> Option<Arc<TrackedDevice>> {
    devices
        .read()
        .await
        .iter()
        .find(|d| d.key() == key)
        .cloned()
}

async fn enumerate(bus: &Arc<dyn UsbBus>) -> Result<Vec<UsbDeviceEntry>> {
    let bus = Arc::clone(bus);
    tokio::task::spawn_blocking(move || bus.enumerate())
        .await
        .map_err(|e| Error::Usb(format!("enumeration task failed: {e}")))?
}

/// Diff the bus against the tracked set: removals first, then additions.
async fn scan(shared: &Arc<Shared>) -> Result<ScanReport> {
    let entries = enumerate(&shared.bus).await?;
    let mut pollers = shared.pollers.lock().await;
    let ctx = &shared.ctx;
    let mut report = ScanReport::default();

    let present: HashSet<(DeviceKey, UsbAddress)> =
        entries.iter().map(|e| (e.key, e.address)).collect();

    let stale: Vec<Arc<TrackedDevice>> = ctx
        .devices
        .read()
        .await
        .iter()
        .filter(|d| !present.contains(&(d.key(), d.address())))
        .cloned()
        .collect();

    for device in stale {
        if let Some(task) = pollers.remove(&device.key()) {
            task.stop().await;
        }
        // Waits out a manual refresh still in flight.
        let poll_guard = device.poll_lock.lock().await;
        device.removed.store(true, Ordering::Release);
        drop(poll_guard);
        ctx.devices
            .write()
            .await
            .retain(|d| !Arc::ptr_eq(d, &device));

        info!(
            name = device.descriptor().display_name,
            address = %device.address(),
            "Device removed"
        );
        report.removed.push(device.key());
        let _ = ctx.events.send(DeviceEvent::Removed(device.snapshot()));
    }

    for entry in &entries {
        let Some(descriptor) = catalog::find_by_key(entry.key) else {
            continue;
        };
        if find_tracked(&ctx.devices, descriptor.key).await.is_some() {
            continue;
        }

        let device = Arc::new(TrackedDevice::new(
            descriptor,
            entry.address,
            shared.config.skip_threshold,
        ));
        ctx.devices.write().await.push(Arc::clone(&device));

        info!(
            name = descriptor.display_name,
            vid = format_args!("0x{:04X}", descriptor.vendor_id()),
            pid = format_args!("0x{:04X}", descriptor.product_id()),
            address = %entry.address,
            "Device added"
        );
        report.added.push(descriptor.key);
        let _ = ctx.events.send(DeviceEvent::Added(device.snapshot()));

        let task = spawn_poller(ctx.clone(), device, shared.config.refresh_interval);
        pollers.insert(descriptor.key, task);
    }

    debug!(
        attached = entries.len(),
        added = report.added.len(),
        removed = report.removed.len(),
        "Bus scan complete"
    );
    Ok(report)
}

fn spawn_poller(
    ctx: PollContext,
    device: Arc<TrackedDevice>,
    refresh_interval: Duration,
) -> PeriodicTask {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let mut ticker = interval(refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    poll_device(&ctx, &device).await;
                }
            }
        }
        debug!(name = device.descriptor().display_name, "Battery polling stopped");
    });

    PeriodicTask {
        stop: stop_tx,
        handle,
    }
}

/// One poll: blocking probe, counterpart lookup on failure, debounce, notify.
///
/// Returns `None` without touching the device once it has been removed.
async fn poll_device(ctx: &PollContext, device: &Arc<TrackedDevice>) -> Option<BatteryState> {
    let _guard = device.poll_lock.lock().await;
    if device.removed.load(Ordering::Acquire) {
        return None;
    }
    let descriptor = device.descriptor();

    let probe = Arc::clone(&ctx.probe);
    let outcome = match tokio::task::spawn_blocking(move || probe.read_battery(descriptor)).await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(name = descriptor.display_name, error = %e, "Battery probe task failed");
            ProbeOutcome::Failed
        }
    };

    let alternative = match (outcome, descriptor.alternative) {
        (ProbeOutcome::Failed, Some(alt_key)) => {
            find_tracked(&ctx.devices, alt_key).await.map(|d| d.battery())
        }
        _ => None,
    };

    let state = device.apply(outcome, alternative);
    debug!(
        name = descriptor.display_name,
        ?outcome,
        level = state.level(),
        skips = device.skip_count(),
        "Battery poll complete"
    );
    let _ = ctx
        .events
        .send(DeviceEvent::BatteryLevelChanged(device.snapshot()));
    Some(state)
}

/// Read every attached supported device once, without debouncing.
///
/// Each catalog model is read at most once even if several units are
/// attached.
pub async fn read_all_once(
    bus: Arc<dyn UsbBus>,
    probe: Arc<dyn BatteryProbe>,
) -> Result<Vec<DeviceSnapshot>> {
    let entries = enumerate(&bus).await?;
    let mut seen = HashSet::new();
    let mut snapshots = Vec::new();

    for entry in entries {
        let Some(descriptor) = catalog::find_by_key(entry.key) else {
            continue;
        };
        if !seen.insert(descriptor.key) {
            continue;
        }

        let probe = Arc::clone(&probe);
        let outcome = tokio::task::spawn_blocking(move || probe.read_battery(descriptor))
            .await
            .unwrap_or(ProbeOutcome::Failed);
        let state = match outcome {
            ProbeOutcome::Level(l) => BatteryState::Known(l.min(100)),
            ProbeOutcome::Failed => BatteryState::Unknown,
        };
        snapshots.push(DeviceSnapshot::new(descriptor, entry.address, state));
    }

    Ok(snapshots)
}
