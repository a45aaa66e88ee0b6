//! usb-battery-core: device catalog, vendor battery protocols, and bus polling.
//!
//! This crate discovers supported Asus and Razer wireless peripherals on the
//! USB bus and keeps a debounced battery level for each of them by speaking
//! the vendors' HID and raw USB protocols.

pub mod alert;
pub mod asus;
pub mod catalog;
pub mod config;
pub mod debounce;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod razer;
pub mod transport;

/// Asus USB Vendor ID.
pub const ASUS_VID: u16 = 0x0B05;

/// Razer USB Vendor ID.
pub const RAZER_VID: u16 = 0x1532;

/// Known product IDs.
pub mod pids {
    /// ROG Strix Scope II 96 (USB cable).
    pub const ROG_STRIX_SCOPE_II_96_WIRED: u16 = 0x1AAE;
    /// ROG Strix Scope II 96 (2.4 GHz dongle).
    pub const ROG_STRIX_SCOPE_II_96_WIRELESS: u16 = 0x1ACE;
    /// DeathAdder V3 Pro (USB cable).
    pub const DEATHADDER_V3_PRO_WIRED: u16 = 0x00B6;
    /// DeathAdder V3 Pro (HyperSpeed dongle).
    pub const DEATHADDER_V3_PRO_WIRELESS: u16 = 0x00B7;
}
