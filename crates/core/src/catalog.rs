//! Supported device catalog.
//!
//! An immutable table of every device model the monitor recognises, keyed by
//! USB vendor/product ID. Each entry names the battery protocol to speak and,
//! for devices sold as a wired/wireless pair, the key of its counterpart.

use crate::{pids, ASUS_VID, RAZER_VID};
use serde::Serialize;

/// USB identity of a device model. Unique across the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceKey {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceKey {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

/// Kind of peripheral, used by the UI layer for icons and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    Headset,
    Keyboard,
    Mouse,
}

impl DeviceType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Headset => "Headset",
            Self::Keyboard => "Keyboard",
            Self::Mouse => "Mouse",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Vendor battery protocol and its per-model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Asus feature-report exchange on the HID collection with this usage.
    AsusHid { usage_page: u16, usage: u16 },
    /// Razer control-transfer exchange tagged with this transaction ID.
    RazerUsb { transaction_id: u8 },
}

impl Protocol {
    /// Manufacturer name implied by the protocol.
    pub fn manufacturer(&self) -> &'static str {
        match self {
            Self::AsusHid { .. } => "Asus",
            Self::RazerUsb { .. } => "Razer",
        }
    }
}

/// A supported device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub key: DeviceKey,
    pub display_name: &'static str,
    pub device_type: DeviceType,
    pub protocol: Protocol,
    /// Wired/wireless counterpart of the same physical unit.
    pub alternative: Option<DeviceKey>,
}

impl DeviceDescriptor {
    pub fn vendor_id(&self) -> u16 {
        self.key.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.key.product_id
    }

    pub fn manufacturer_name(&self) -> &'static str {
        self.protocol.manufacturer()
    }
}

/// Asus vendor-defined collection carrying the battery feature reports.
const ASUS_USAGE_PAGE: u16 = 0xFF00;
const ASUS_USAGE: u16 = 0x0001;

const RAZER_DEATHADDER_TRANSACTION_ID: u8 = 0x1F;

const ROG_SCOPE_II_96_WIRED: DeviceKey = DeviceKey::new(ASUS_VID, pids::ROG_STRIX_SCOPE_II_96_WIRED);
const ROG_SCOPE_II_96_WIRELESS: DeviceKey =
    DeviceKey::new(ASUS_VID, pids::ROG_STRIX_SCOPE_II_96_WIRELESS);
const DEATHADDER_V3_PRO_WIRED: DeviceKey = DeviceKey::new(RAZER_VID, pids::DEATHADDER_V3_PRO_WIRED);
const DEATHADDER_V3_PRO_WIRELESS: DeviceKey =
    DeviceKey::new(RAZER_VID, pids::DEATHADDER_V3_PRO_WIRELESS);

static SUPPORTED_DEVICES: [DeviceDescriptor; 4] = [
    DeviceDescriptor {
        key: ROG_SCOPE_II_96_WIRED,
        display_name: "Asus ROG Strix Scope II 96 Wired",
        device_type: DeviceType::Keyboard,
        protocol: Protocol::AsusHid {
            usage_page: ASUS_USAGE_PAGE,
            usage: ASUS_USAGE,
        },
        alternative: Some(ROG_SCOPE_II_96_WIRELESS),
    },
    DeviceDescriptor {
        key: ROG_SCOPE_II_96_WIRELESS,
        display_name: "Asus ROG Strix Scope II 96 Wireless",
        device_type: DeviceType::Keyboard,
        protocol: Protocol::AsusHid {
            usage_page: ASUS_USAGE_PAGE,
            usage: ASUS_USAGE,
        },
        alternative: Some(ROG_SCOPE_II_96_WIRED),
    },
    DeviceDescriptor {
        key: DEATHADDER_V3_PRO_WIRED,
        display_name: "Razer Deathadder V3 Pro Wired",
        device_type: DeviceType::Mouse,
        protocol: Protocol::RazerUsb {
            transaction_id: RAZER_DEATHADDER_TRANSACTION_ID,
        },
        alternative: Some(DEATHADDER_V3_PRO_WIRELESS),
    },
    DeviceDescriptor {
        key: DEATHADDER_V3_PRO_WIRELESS,
        display_name: "Razer Deathadder V3 Pro Wireless",
        device_type: DeviceType::Mouse,
        protocol: Protocol::RazerUsb {
            transaction_id: RAZER_DEATHADDER_TRANSACTION_ID,
        },
        alternative: Some(DEATHADDER_V3_PRO_WIRED),
    },
];

/// All supported device models.
pub fn all() -> &'static [DeviceDescriptor] {
    &SUPPORTED_DEVICES
}

/// Look up a model by USB vendor/product ID.
pub fn find(vendor_id: u16, product_id: u16) -> Option<&'static DeviceDescriptor> {
    find_by_key(DeviceKey::new(vendor_id, product_id))
}

/// Look up a model by key.
pub fn find_by_key(key: DeviceKey) -> Option<&'static DeviceDescriptor> {
    SUPPORTED_DEVICES.iter().find(|d| d.key == key)
}
