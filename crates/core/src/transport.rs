//! Transport abstractions for device communication.
//!
//! The vendor protocols talk to hardware through three small traits so that
//! real devices (hidapi, rusb) and mock devices share the same interface:
//! - [`HidReportTransport`]: raw HID output report write and timed input read.
//! - [`UsbControlTransport`]: synchronous USB control transfers.
//! - [`UsbBus`]: enumeration of attached USB devices.

use crate::catalog::DeviceKey;
use crate::error::{Error, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Raw HID report exchange on an opened HID interface.
pub trait HidReportTransport {
    /// Write an output report (first byte is the report ID).
    fn write_report(&self, data: &[u8]) -> Result<usize>;

    /// Read an input report, waiting at most `timeout`.
    fn read_report(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// USB control transfers on an opened device handle.
pub trait UsbControlTransport {
    /// Host-to-device control transfer. Returns bytes transferred.
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Device-to-host control transfer. Returns bytes transferred.
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;
}

/// Position of a device on the USB bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UsbAddress {
    pub bus: u8,
    pub address: u8,
}

impl std::fmt::Display for UsbAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// One attached USB device as seen by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceEntry {
    pub key: DeviceKey,
    pub address: UsbAddress,
}

/// Source of the list of attached USB devices.
pub trait UsbBus: Send + Sync {
    /// Enumerate every attached device. Order is unspecified.
    fn enumerate(&self) -> Result<Vec<UsbDeviceEntry>>;
}

/// [`HidReportTransport`] over an opened hidapi device.
pub struct HidApiTransport {
    device: hidapi::HidDevice,
}

impl HidApiTransport {
    pub fn new(device: hidapi::HidDevice) -> Self {
        Self { device }
    }
}

impl HidReportTransport for HidApiTransport {
    fn write_report(&self, data: &[u8]) -> Result<usize> {
        trace!(report_hex = format_args!("{:02X?}", data), "HID TX");
        self.device
            .write(data)
            .map_err(|e| Error::Hid(format!("write: {e}")))
    }

    fn read_report(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = self
            .device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| Error::Hid(format!("read_timeout: {e}")))?;

        if n == 0 {
            return Err(Error::Timeout(format!(
                "hid_read timed out after {timeout_ms}ms"
            )));
        }

        trace!(report_hex = format_args!("{:02X?}", &buf[..n]), "HID RX");
        Ok(n)
    }
}

/// [`UsbControlTransport`] over an opened libusb device handle.
///
/// The handle is closed when this value is dropped.
pub struct RusbTransport<T: rusb::UsbContext> {
    handle: rusb::DeviceHandle<T>,
}

impl<T: rusb::UsbContext> RusbTransport<T> {
    pub fn new(handle: rusb::DeviceHandle<T>) -> Self {
        Self { handle }
    }
}

impl<T: rusb::UsbContext> UsbControlTransport for RusbTransport<T> {
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        trace!(
            request_type = format_args!("0x{:02X}", request_type),
            request = format_args!("0x{:02X}", request),
            report_hex = format_args!("{:02X?}", data),
            "USB control TX"
        );
        Ok(self
            .handle
            .write_control(request_type, request, value, index, data, timeout)?)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let n = self
            .handle
            .read_control(request_type, request, value, index, buf, timeout)?;
        trace!(
            request_type = format_args!("0x{:02X}", request_type),
            request = format_args!("0x{:02X}", request),
            report_hex = format_args!("{:02X?}", &buf[..n]),
            "USB control RX"
        );
        Ok(n)
    }
}

/// [`UsbBus`] backed by a fresh libusb context per enumeration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RusbBus;

impl UsbBus for RusbBus {
    fn enumerate(&self) -> Result<Vec<UsbDeviceEntry>> {
        use rusb::UsbContext;

        let context = rusb::Context::new()?;
        let mut entries = Vec::new();
        for device in context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!(
                        bus = device.bus_number(),
                        address = device.address(),
                        error = %e,
                        "Skipping device without readable descriptor"
                    );
                    continue;
                }
            };
            entries.push(UsbDeviceEntry {
                key: DeviceKey::new(desc.vendor_id(), desc.product_id()),
                address: UsbAddress {
                    bus: device.bus_number(),
                    address: device.address(),
                },
            });
        }

        trace!(count = entries.len(), "USB enumeration complete");
        Ok(entries)
    }
}

/// Mock transports for testing.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Mock HID interface: records written reports and replays one response.
    pub struct MockHidTransport {
        writes: Mutex<Vec<Vec<u8>>>,
        response: Mutex<Option<Vec<u8>>>,
    }

    impl MockHidTransport {
        /// A device that never answers (read times out).
        pub fn silent() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                response: Mutex::new(None),
            }
        }

        /// A device that answers every read with `response`.
        pub fn responding(response: Vec<u8>) -> Self {
            let mock = Self::silent();
            *mock.response.lock().unwrap() = Some(response);
            mock
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl HidReportTransport for MockHidTransport {
        fn write_report(&self, data: &[u8]) -> Result<usize> {
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(data.len())
        }

        fn read_report(&self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            match self.response.lock().unwrap().as_ref() {
                Some(resp) => {
                    let n = resp.len().min(buf.len());
                    buf[..n].copy_from_slice(&resp[..n]);
                    Ok(n)
                }
                None => Err(Error::Timeout("mock: no response".into())),
            }
        }
    }

    /// One recorded control transfer.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ControlCall {
        pub request_type: u8,
        pub request: u8,
        pub value: u16,
        pub index: u16,
        pub data: Vec<u8>,
    }

    /// Mock USB handle: records SET_REPORT payloads and replays one GET_REPORT.
    pub struct MockUsbTransport {
        writes: Mutex<Vec<ControlCall>>,
        reads: Mutex<Vec<ControlCall>>,
        response: Vec<u8>,
    }

    impl MockUsbTransport {
        pub fn responding(response: Vec<u8>) -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                reads: Mutex::new(Vec::new()),
                response,
            }
        }

        pub fn writes(&self) -> Vec<ControlCall> {
            self.writes.lock().unwrap().clone()
        }

        pub fn reads(&self) -> Vec<ControlCall> {
            self.reads.lock().unwrap().clone()
        }
    }

    impl UsbControlTransport for MockUsbTransport {
        fn write_control(
            &self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            data: &[u8],
            _timeout: Duration,
        ) -> Result<usize> {
            self.writes.lock().unwrap().push(ControlCall {
                request_type,
                request,
                value,
                index,
                data: data.to_vec(),
            });
            Ok(data.len())
        }

        fn read_control(
            &self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> Result<usize> {
            self.reads.lock().unwrap().push(ControlCall {
                request_type,
                request,
                value,
                index,
                data: Vec::new(),
            });
            let n = self.response.len().min(buf.len());
            buf[..n].copy_from_slice(&self.response[..n]);
            Ok(n)
        }
    }

    /// Mock bus whose device list can be changed between scans.
    pub struct MockBus {
        devices: Mutex<Option<Vec<UsbDeviceEntry>>>,
    }

    impl MockBus {
        pub fn new(devices: Vec<UsbDeviceEntry>) -> Self {
            Self {
                devices: Mutex::new(Some(devices)),
            }
        }

        pub fn set_devices(&self, devices: Vec<UsbDeviceEntry>) {
            *self.devices.lock().unwrap() = Some(devices);
        }

        /// Make the next enumerations fail until `set_devices` is called.
        pub fn fail(&self) {
            *self.devices.lock().unwrap() = None;
        }
    }

    impl UsbBus for MockBus {
        fn enumerate(&self) -> Result<Vec<UsbDeviceEntry>> {
            self.devices
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::Usb("mock: enumeration failed".into()))
        }
    }

    /// Convenience constructor for bus entries.
    pub fn entry(vendor_id: u16, product_id: u16, bus: u8, address: u8) -> UsbDeviceEntry {
        UsbDeviceEntry {
            key: DeviceKey::new(vendor_id, product_id),
            address: UsbAddress { bus, address },
        }
    }
}
