//! Asus battery query over HID feature reports.
//!
//! Asus wireless keyboards expose a vendor-defined HID collection
//! (usage page 0xFF00) next to the standard keyboard collection. The battery
//! query is a single 64-byte report exchange on that collection:
//!
//! ```text
//! request:  [0x02, 0x12, 0x01, 0x00 ...]        report ID, command type, command
//! response: [0x02, 0x12, 0x01, ?, ?, ?, level, ...]   device online
//!           [0x02, 0xFF, 0xAA, ...]             device asleep
//! ```
//!
//! The level at byte 6 is already a 0-100 percentage.

use crate::catalog::DeviceKey;
use crate::error::{Error, Result};
use crate::transport::{HidApiTransport, HidReportTransport};
use std::time::Duration;
use tracing::{debug, trace};

/// Length of both the request and the response report.
pub const REPORT_LEN: usize = 64;
/// Output report ID of the vendor collection.
pub const REPORT_ID: u8 = 0x02;
/// Command type echoed back by an awake device.
pub const CMD_TYPE_BATTERY: u8 = 0x12;
/// Battery status command.
pub const CMD_GET_BATTERY: u8 = 0x01;
/// Command-type byte returned while the keyboard sleeps.
pub const SLEEP_ECHO: u8 = 0xFF;

const LEVEL_OFFSET: usize = 6;

/// Read timeout for the response report.
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// The HID collection to talk to for one device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsusTarget {
    pub key: DeviceKey,
    pub usage_page: u16,
    pub usage: u16,
}

impl AsusTarget {
    /// Whether an enumerated HID interface is the battery collection.
    pub fn matches(&self, vendor_id: u16, product_id: u16, usage_page: u16, usage: u16) -> bool {
        self.key.vendor_id == vendor_id
            && self.key.product_id == product_id
            && self.usage_page == usage_page
            && self.usage == usage
    }
}

/// Build the battery status request report.
pub fn encode_battery_request() -> [u8; REPORT_LEN] {
    let mut buf = [0u8; REPORT_LEN];
    buf[0] = REPORT_ID;
    buf[1] = CMD_TYPE_BATTERY;
    buf[2] = CMD_GET_BATTERY;
    buf
}

/// Decode a battery status response into a percentage.
pub fn parse_battery_response(data: &[u8]) -> Result<u8> {
    if data.len() != REPORT_LEN {
        return Err(Error::MalformedResponse(format!(
            "short read: {} bytes (expected {})",
            data.len(),
            REPORT_LEN
        )));
    }

    match data[1] {
        CMD_TYPE_BATTERY => {}
        SLEEP_ECHO => {
            return Err(Error::MalformedResponse("device is asleep".into()));
        }
        other => {
            return Err(Error::MalformedResponse(format!(
                "unexpected command echo 0x{other:02X}"
            )));
        }
    }

    let level = data[LEVEL_OFFSET];
    if level > 100 {
        return Err(Error::MalformedResponse(format!(
            "battery level {level} exceeds 100"
        )));
    }
    Ok(level)
}

/// Send the battery request and decode the answer.
pub fn read_battery(transport: &dyn HidReportTransport) -> Result<u8> {
    transport.write_report(&encode_battery_request())?;

    let mut response = [0u8; REPORT_LEN];
    let n = transport.read_report(&mut response, READ_TIMEOUT)?;
    trace!(bytes = n, level_byte = response[LEVEL_OFFSET], "Asus battery response");

    parse_battery_response(&response[..n])
}

/// Locate and open the battery collection of a connected device.
///
/// Refreshes the hidapi device list first so newly plugged devices are seen.
pub fn open_battery_interface(
    api: &mut hidapi::HidApi,
    target: &AsusTarget,
) -> Result<HidApiTransport> {
    api.refresh_devices()?;

    let info = api
        .device_list()
        .find(|d| target.matches(d.vendor_id(), d.product_id(), d.usage_page(), d.usage()))
        .ok_or_else(|| {
            Error::DeviceNotFound(format!(
                "no HID interface {} with usage 0x{:04X}/0x{:04X}",
                target.key, target.usage_page, target.usage
            ))
        })?;

    debug!(
        vid = format_args!("0x{:04X}", info.vendor_id()),
        pid = format_args!("0x{:04X}", info.product_id()),
        path = %info.path().to_string_lossy(),
        "Opening Asus battery interface"
    );
    let device = info.open_device(api)?;
    Ok(HidApiTransport::new(device))
}

/// Full battery query against real hardware.
pub fn query_battery(api: &mut hidapi::HidApi, target: &AsusTarget) -> Result<u8> {
    let transport = open_battery_interface(api, target)?;
    read_battery(&transport)
}
