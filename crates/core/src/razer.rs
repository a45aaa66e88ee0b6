//! Razer battery query over raw USB control transfers.
//!
//! Razer mice answer 90-byte feature reports sent with HID class requests on
//! interface 0. A report is laid out as:
//!
//! ```text
//! [0]      status            0x00 in requests, 0x02 = success in responses
//! [1]      transaction ID    model specific
//! [2..4]   remaining packets
//! [4]      protocol type
//! [5]      data size
//! [6]      command class
//! [7]      command ID
//! [8..88]  arguments
//! [88]     XOR of bytes [2..88)
//! [89]     reserved
//! ```
//!
//! Battery level is command 0x07/0x80; the answer carries the charge as
//! 0-255 in argument byte 1 (report byte 9).

use crate::catalog::DeviceKey;
use crate::error::{Error, Result};
use crate::transport::{RusbTransport, UsbControlTransport};
use std::time::Duration;
use tracing::{debug, trace};

/// Length of request and response reports.
pub const REPORT_LEN: usize = 90;

/// Response status: command completed.
pub const STATUS_SUCCESS: u8 = 0x02;

/// Battery level command.
pub const CMD_CLASS_POWER: u8 = 0x07;
pub const CMD_GET_BATTERY: u8 = 0x80;
const BATTERY_DATA_SIZE: u8 = 0x02;

const CHECKSUM_OFFSET: usize = 88;
const LEVEL_OFFSET: usize = 9;

/// HID class request codes.
pub const HID_REQ_SET_REPORT: u8 = 0x09;
pub const HID_REQ_GET_REPORT: u8 = 0x01;
/// wValue: feature report, report ID 0.
pub const REPORT_VALUE: u16 = 0x0300;
pub const REPORT_INDEX: u16 = 0x00;

/// bmRequestType: host-to-device | class | interface.
pub const SET_REPORT_REQUEST_TYPE: u8 = 0x21;
/// bmRequestType: device-to-host | class | interface.
pub const GET_REPORT_REQUEST_TYPE: u8 = 0xA1;

/// Time the device needs to prepare its answer after SET_REPORT.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Timeout for each control transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(1);

/// XOR checksum over bytes [2..88) of a report.
pub fn checksum(report: &[u8; REPORT_LEN]) -> u8 {
    report[2..CHECKSUM_OFFSET].iter().fold(0, |acc, b| acc ^ b)
}

/// Build the battery level request for a given transaction ID.
pub fn encode_battery_request(transaction_id: u8) -> [u8; REPORT_LEN] {
    let mut buf = [0u8; REPORT_LEN];
    buf[1] = transaction_id;
    buf[5] = BATTERY_DATA_SIZE;
    buf[6] = CMD_CLASS_POWER;
    buf[7] = CMD_GET_BATTERY;
    buf[CHECKSUM_OFFSET] = checksum(&buf);
    buf
}

/// Scale a raw 0-255 charge value to a rounded percentage.
pub fn raw_to_percent(raw: u8) -> u8 {
    (f32::from(raw) / 255.0 * 100.0).round() as u8
}

/// Decode a battery level response into a percentage.
pub fn parse_battery_response(data: &[u8]) -> Result<u8> {
    if data.is_empty() {
        return Err(Error::MalformedResponse("no bytes transferred".into()));
    }
    if data.len() != REPORT_LEN {
        return Err(Error::MalformedResponse(format!(
            "response length {} (expected {})",
            data.len(),
            REPORT_LEN
        )));
    }
    if data[0] != STATUS_SUCCESS {
        return Err(Error::MalformedResponse(format!(
            "status 0x{:02X}",
            data[0]
        )));
    }

    Ok(raw_to_percent(data[LEVEL_OFFSET]))
}

/// Run the SET_REPORT / settle / GET_REPORT exchange on an opened handle.
pub fn read_battery(
    transport: &dyn UsbControlTransport,
    transaction_id: u8,
    settle_delay: Duration,
) -> Result<u8> {
    let request = encode_battery_request(transaction_id);
    transport.write_control(
        SET_REPORT_REQUEST_TYPE,
        HID_REQ_SET_REPORT,
        REPORT_VALUE,
        REPORT_INDEX,
        &request,
        TRANSFER_TIMEOUT,
    )?;

    std::thread::sleep(settle_delay);

    let mut response = [0u8; REPORT_LEN];
    let n = transport.read_control(
        GET_REPORT_REQUEST_TYPE,
        HID_REQ_GET_REPORT,
        REPORT_VALUE,
        REPORT_INDEX,
        &mut response,
        TRANSFER_TIMEOUT,
    )?;
    trace!(bytes = n, status = response[0], "Razer battery response");

    parse_battery_response(&response[..n])
}

/// Full battery query against real hardware.
///
/// Opens a fresh libusb context and device handle for this one exchange; both
/// are released when this function returns, on every path.
pub fn query_battery(key: DeviceKey, transaction_id: u8) -> Result<u8> {
    use rusb::UsbContext;

    let context = rusb::Context::new()?;
    let handle = context
        .open_device_with_vid_pid(key.vendor_id, key.product_id)
        .ok_or_else(|| Error::DeviceNotFound(format!("no USB device {key}")))?;
    debug!(
        vid = format_args!("0x{:04X}", key.vendor_id),
        pid = format_args!("0x{:04X}", key.product_id),
        "Opened Razer device"
    );

    let transport = RusbTransport::new(handle);
    read_battery(&transport, transaction_id, SETTLE_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockUsbTransport;

    fn response(status: u8, raw_level: u8) -> Vec<u8> {
        let mut resp = vec![0u8; REPORT_LEN];
        resp[0] = status;
        resp[1] = 0x1F;
        resp[5] = 0x02;
        resp[6] = CMD_CLASS_POWER;
        resp[7] = CMD_GET_BATTERY;
        resp[LEVEL_OFFSET] = raw_level;
        resp
    }

    #[test]
    fn request_layout() {
        let req = encode_battery_request(0x1F);
        assert_eq!(req.len(), 90);
        assert_eq!(&req[..8], &[0x00, 0x1F, 0x00, 0x00, 0x00, 0x02, 0x07, 0x80]);
        assert!(req[8..88].iter().all(|&b| b == 0));
        // 0x02 ^ 0x07 ^ 0x80
        assert_eq!(req[88], 0x85);
        assert_eq!(req[89], 0x00);
    }

    #[test]
    fn checksum_ignores_status_and_transaction_id() {
        let a = encode_battery_request(0x1F);
        let b = encode_battery_request(0x3F);
        assert_eq!(a[88], b[88]);
    }

    #[test]
    fn request_types_match_libusb_encoding() {
        use rusb::{Direction, Recipient, RequestType};
        assert_eq!(
            SET_REPORT_REQUEST_TYPE,
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface)
        );
        assert_eq!(
            GET_REPORT_REQUEST_TYPE,
            rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface)
        );
    }

    #[test]
    fn raw_level_scaling() {
        assert_eq!(raw_to_percent(191), 75);
        assert_eq!(raw_to_percent(255), 100);
        assert_eq!(raw_to_percent(0), 0);
        assert_eq!(raw_to_percent(128), 50);
    }

    #[test]
    fn parse_success_response() {
        assert_eq!(parse_battery_response(&response(0x02, 191)).unwrap(), 75);
    }

    #[test]
    fn parse_rejects_failure_status() {
        // 0x03 = command failure, 0x01 = busy
        assert!(parse_battery_response(&response(0x03, 191)).is_err());
        assert!(parse_battery_response(&response(0x01, 191)).is_err());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let resp = response(0x02, 191);
        assert!(parse_battery_response(&resp[..89]).is_err());
        assert!(parse_battery_response(&[]).is_err());
    }

    #[test]
    fn read_battery_issues_set_then_get_report() {
        let mock = MockUsbTransport::responding(response(0x02, 191));
        let level = read_battery(&mock, 0x1F, Duration::ZERO).unwrap();
        assert_eq!(level, 75);

        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].request_type, 0x21);
        assert_eq!(writes[0].request, 0x09);
        assert_eq!(writes[0].value, 0x0300);
        assert_eq!(writes[0].index, 0x00);
        assert_eq!(writes[0].data, encode_battery_request(0x1F).to_vec());

        let reads = mock.reads();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].request_type, 0xA1);
        assert_eq!(reads[0].request, 0x01);
        assert_eq!(reads[0].value, 0x0300);
    }

    #[test]
    fn read_battery_zero_bytes_fails() {
        let mock = MockUsbTransport::responding(Vec::new());
        assert!(matches!(
            read_battery(&mock, 0x1F, Duration::ZERO),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn read_battery_short_response_fails() {
        let mock = MockUsbTransport::responding(response(0x02, 191)[..89].to_vec());
        assert!(read_battery(&mock, 0x1F, Duration::ZERO).is_err());
    }
}
