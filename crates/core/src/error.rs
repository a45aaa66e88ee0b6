//! Error types for usb-battery-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HID device communication failure.
    #[error("HID error: {0}")]
    Hid(String),

    /// Raw USB (libusb) failure.
    #[error("USB error: {0}")]
    Usb(String),

    /// No HID interface or USB handle matches the descriptor.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Read or control transfer exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Wrong length or unexpected status/echo byte in a device response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Value out of allowed range.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => Error::Timeout(err.to_string()),
            rusb::Error::NoDevice | rusb::Error::NotFound => Error::DeviceNotFound(err.to_string()),
            other => Error::Usb(other.to_string()),
        }
    }
}

impl From<hidapi::HidError> for Error {
    fn from(err: hidapi::HidError) -> Self {
        Error::Hid(err.to_string())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
