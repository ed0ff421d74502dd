//! Device catalog: enumeration and lookup of attached devices.

use log::{debug, trace};

use crate::device::DeviceDescriptor;
use crate::host::UsbHost;

/// List attached devices a serial driver can be matched to, in the order
/// the host reports them.
///
/// Enumeration failures yield an empty list.
pub fn list(host: &dyn UsbHost) -> Vec<DeviceDescriptor> {
    match host.devices() {
        Ok(devices) => devices
            .into_iter()
            .filter(|device| {
                let matched = host.probe_driver(device).is_some();
                if !matched {
                    trace!("No serial driver for {}, skipping", device.id);
                }
                matched
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate USB devices: {e}");
            Vec::new()
        },
    }
}

/// Resolve an attached device by exact identifier.
pub fn find(host: &dyn UsbHost, device_id: &str) -> Option<DeviceDescriptor> {
    match host.devices() {
        Ok(devices) => devices.into_iter().find(|device| device.id == device_id),
        Err(e) => {
            debug!("Failed to enumerate USB devices: {e}");
            None
        },
    }
}

/// Render devices as `"<id> - <product> - VID:XXXX PID:XXXX"` lines.
pub fn format_listing(devices: &[DeviceDescriptor]) -> Vec<String> {
    devices.iter().map(ToString::to_string).collect()
}
