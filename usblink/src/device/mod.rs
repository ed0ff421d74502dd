//! Device descriptors and USB bridge classification.
//!
//! A [`DeviceDescriptor`] is produced fresh by every enumeration and is never
//! mutated afterwards. [`DeviceKind`] is display metadata only; it never
//! decides whether a device can be connected.

use std::fmt;

/// Product name shown when the device does not report one.
pub const DEFAULT_PRODUCT_NAME: &str = "USB Serial Device";

/// Known USB-UART bridge families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// WCH CH340/CH341/CH9102 bridge.
    Ch34x,
    /// Silicon Labs CP210x bridge.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 bridge.
    Ftdi,
    /// Prolific PL2303 bridge.
    Prolific,
    /// STMicroelectronics virtual COM port.
    StVcp,
    /// Arduino board with native USB.
    Arduino,
    /// Anything else (generic CDC-ACM and friends).
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_BRIDGES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch34x,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
    (0x0483, &[0x5740], DeviceKind::StVcp),
    (0x2341, &[], DeviceKind::Arduino),
];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| {
                vid == *known_vid && (pids.is_empty() || pids.contains(&pid))
            })
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable family name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch34x => "CH34x",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::StVcp => "STM32 VCP",
            Self::Arduino => "Arduino",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognized bridge family.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// An attached USB device that may expose a serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceDescriptor {
    /// OS device path or name, unique while attached (e.g. "/dev/ttyUSB0").
    pub id: String,
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Product string, if the device reports one.
    pub product: Option<String>,
    /// Manufacturer string, if the device reports one.
    pub manufacturer: Option<String>,
    /// Serial number, if the device reports one.
    pub serial_number: Option<String>,
}

impl DeviceDescriptor {
    /// Create a descriptor with only the mandatory fields set.
    pub fn new(id: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            id: id.into(),
            vid,
            pid,
            product: None,
            manufacturer: None,
            serial_number: None,
        }
    }

    /// Set the product string.
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Set the manufacturer string.
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set the serial number.
    #[must_use]
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Bridge family of this device.
    pub fn kind(&self) -> DeviceKind {
        DeviceKind::from_vid_pid(self.vid, self.pid)
    }

    /// Product name, falling back to [`DEFAULT_PRODUCT_NAME`].
    pub fn product_name(&self) -> &str {
        self.product
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PRODUCT_NAME)
    }
}

/// Renders the listing line `"<id> - <product> - VID:XXXX PID:XXXX"`.
impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - VID:{:04X} PID:{:04X}",
            self.id,
            self.product_name(),
            self.vid,
            self.pid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch34x);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(
            DeviceKind::from_vid_pid(0x067B, 0x2303),
            DeviceKind::Prolific
        );
        assert_eq!(
            DeviceKind::from_vid_pid(0x2341, 0x0043),
            DeviceKind::Arduino
        );
        assert_eq!(
            DeviceKind::from_vid_pid(0x1A86, 0x0001),
            DeviceKind::Unknown
        );
        assert_eq!(
            DeviceKind::from_vid_pid(0x1234, 0x5678),
            DeviceKind::Unknown
        );
    }

    #[test]
    fn test_display_uses_listing_format() {
        let device = DeviceDescriptor::new("/dev/ttyUSB0", 0x1A86, 0x7523)
            .with_product("USB2.0-Ser!");
        assert_eq!(
            device.to_string(),
            "/dev/ttyUSB0 - USB2.0-Ser! - VID:1A86 PID:7523"
        );
    }

    #[test]
    fn test_display_falls_back_to_default_product() {
        let device = DeviceDescriptor::new("/dev/bus/usb/001/004", 0x0b, 0xA);
        assert_eq!(
            device.to_string(),
            "/dev/bus/usb/001/004 - USB Serial Device - VID:000B PID:000A"
        );

        let blank = DeviceDescriptor::new("COM3", 0x2341, 0x0043).with_product("  ");
        assert_eq!(blank.product_name(), DEFAULT_PRODUCT_NAME);
    }
}
