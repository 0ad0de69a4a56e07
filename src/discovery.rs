//! Device identification.
//!
//! Maps USB vendor/product IDs onto the devices this crate knows how to
//! stream from, and selects which attached device to open.

use std::fmt;

use crate::framing::FTDI_PACKET_SIZE;
use crate::types::{ChipCaps, DeviceInfo};

// =============================================================================
// Known Devices
// =============================================================================

/// An entry in the table of supported devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnownDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
    pub caps: ChipCaps,
}

const FTDI_VID: u16 = 0x0403;
const FPGA_VID: u16 = 0xe461;
const ATMEL_VID: u16 = 0x03eb;

/// Devices recognised during enumeration.
pub const KNOWN_DEVICES: &[KnownDevice] = &[
    KnownDevice {
        vendor_id: FTDI_VID,
        product_id: 0x6010,
        name: "FT2232H",
        caps: ChipCaps::FT2232H,
    },
    KnownDevice {
        vendor_id: FPGA_VID,
        product_id: 0x0014,
        name: "TWL FPGA",
        caps: ChipCaps::FT2232H,
    },
    KnownDevice {
        vendor_id: FPGA_VID,
        product_id: 0x0015,
        name: "CTR FPGA",
        caps: ChipCaps::FT2232H,
    },
    KnownDevice {
        vendor_id: FPGA_VID,
        product_id: 0x0016,
        name: "CTR FPGA 2",
        caps: ChipCaps::FT2232H,
    },
    // Microcontroller test rig; streams raw bulk data with no status bytes.
    KnownDevice {
        vendor_id: ATMEL_VID,
        product_id: 0x6119,
        name: "Test device",
        caps: ChipCaps {
            packet_size: FTDI_PACKET_SIZE,
            alternate_header: true,
        },
    },
];

/// Look up a vendor/product pair in [`KNOWN_DEVICES`].
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static KnownDevice> {
    KNOWN_DEVICES
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

impl KnownDevice {
    /// Build the [`DeviceInfo`] for an attached instance of this device.
    pub fn info(&self, serial: Option<String>) -> DeviceInfo {
        DeviceInfo {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            name: self.name.to_string(),
            serial,
            caps: self.caps,
        }
    }
}

// =============================================================================
// Device Selection
// =============================================================================

/// Which attached device to open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The first known device found.
    #[default]
    Any,
    /// The first device with this vendor/product pair.
    VidPid { vendor_id: u16, product_id: u16 },
    /// The device with this serial number.
    Serial(String),
}

impl DeviceSelector {
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        match self {
            DeviceSelector::Any => true,
            DeviceSelector::VidPid {
                vendor_id,
                product_id,
            } => info.vendor_id == *vendor_id && info.product_id == *product_id,
            DeviceSelector::Serial(serial) => info.serial.as_deref() == Some(serial.as_str()),
        }
    }

    /// Pick the first matching device.
    pub fn select<'a>(&self, devices: &'a [DeviceInfo]) -> Option<&'a DeviceInfo> {
        devices.iter().find(|d| self.matches(d))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Any => f.write_str("any device"),
            DeviceSelector::VidPid {
                vendor_id,
                product_id,
            } => write!(f, "{:04x}:{:04x}", vendor_id, product_id),
            DeviceSelector::Serial(serial) => write!(f, "serial {}", serial),
        }
    }
}

impl std::str::FromStr for DeviceSelector {
    type Err = crate::Error;

    /// Parses `vvvv:pppp` (hex) as a vendor/product pair and anything else
    /// as a serial number. An empty string selects any device.
    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(DeviceSelector::Any);
        }
        if let Some((vid, pid)) = s.split_once(':') {
            let parse = |part: &str| {
                u16::from_str_radix(part, 16)
                    .map_err(|_| crate::Error::invalid_config(format!("bad USB id '{}'", s)))
            };
            return Ok(DeviceSelector::VidPid {
                vendor_id: parse(vid)?,
                product_id: parse(pid)?,
            });
        }
        Ok(DeviceSelector::Serial(s.to_string()))
    }
}
