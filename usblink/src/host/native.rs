//! Native host backed by the OS serial driver.
//!
//! Enumeration goes through `serialport::available_ports()` and keeps only
//! USB serial ports; the port path is the device identifier. Desktop
//! operating systems grant access through file permissions rather than an
//! interactive prompt, so permission is always reported as held and an
//! access problem surfaces as an open failure instead.
//!
//! Hot-plug is detected by polling the port list on a background thread.

use {
    super::{DeviceHandle, SerialDriver, UsbHost},
    crate::{
        config::SessionConfig,
        device::DeviceDescriptor,
        error::Result,
        hotplug::{self, HotplugNotifier},
        permission::PermissionResponder,
        port::{SerialPort, native::NativePort},
    },
    log::{debug, trace},
    std::{thread, time::Duration},
};

/// Host for real USB serial adapters.
#[derive(Debug, Clone)]
pub struct NativeHost {
    port_timeout: Duration,
    hotplug_interval: Duration,
}

impl NativeHost {
    /// Create a host using the session's timeouts.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            port_timeout: config.read_timeout,
            hotplug_interval: config.hotplug_interval,
        }
    }
}

impl Default for NativeHost {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

/// Enumerate USB serial ports in the order the OS reports them.
fn usb_ports() -> Result<Vec<DeviceDescriptor>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .filter_map(|info| match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X})",
                    info.port_name, usb.vid, usb.pid
                );
                let mut device = DeviceDescriptor::new(info.port_name, usb.vid, usb.pid);
                device.product = usb.product;
                device.manufacturer = usb.manufacturer;
                device.serial_number = usb.serial_number;
                Some(device)
            },
            _ => None,
        })
        .collect())
}

#[cfg(unix)]
fn device_node_present(device_id: &str) -> bool {
    std::path::Path::new(device_id).exists()
}

#[cfg(not(unix))]
fn device_node_present(_device_id: &str) -> bool {
    true
}

impl UsbHost for NativeHost {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        usb_ports()
    }

    fn has_permission(&self, _device: &DeviceDescriptor) -> bool {
        true
    }

    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder) {
        debug!(
            "No permission prompt on this platform, granting {}",
            device.id
        );
        responder.resolve(true);
    }

    fn probe_driver(&self, device: &DeviceDescriptor) -> Option<Box<dyn SerialDriver>> {
        if !device_node_present(&device.id) {
            trace!("No device node for {}", device.id);
            return None;
        }
        Some(Box::new(NativeDriver {
            port: Some(NativePort::new(device.id.clone(), self.port_timeout)),
        }))
    }

    fn open_device(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>> {
        #[cfg(unix)]
        std::fs::metadata(&device.id)?;

        Ok(Box::new(NativeHandle {
            device_id: device.id.clone(),
        }))
    }

    fn watch(&self, notifier: HotplugNotifier) -> Result<()> {
        let interval = self.hotplug_interval;
        let mut known = port_names();

        thread::Builder::new()
            .name("usblink-hotplug".into())
            .spawn(move || {
                debug!("Hot-plug watcher started");
                while notifier.is_alive() {
                    thread::sleep(interval);
                    let current = port_names();
                    for event in hotplug::diff(&known, &current) {
                        if !notifier.notify(event) {
                            break;
                        }
                    }
                    known = current;
                }
                debug!("Hot-plug watcher stopped");
            })?;
        Ok(())
    }
}

fn port_names() -> Vec<String> {
    match usb_ports() {
        Ok(devices) => devices.into_iter().map(|device| device.id).collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// A USB tty has exactly one port: itself.
struct NativeDriver {
    port: Option<NativePort>,
}

impl SerialDriver for NativeDriver {
    fn port_count(&self) -> usize {
        usize::from(self.port.is_some())
    }

    fn first_port(&mut self) -> Option<Box<dyn SerialPort>> {
        self.port
            .take()
            .map(|port| Box::new(port) as Box<dyn SerialPort>)
    }
}

/// The port path doubles as the device handle; the OS file descriptor is
/// owned by the port.
struct NativeHandle {
    device_id: String,
}

impl DeviceHandle for NativeHandle {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_host_always_holds_permission() {
        let host = NativeHost::default();
        let device = DeviceDescriptor::new("/dev/ttyUSB0", 0x1A86, 0x7523);
        assert!(host.has_permission(&device));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_node_has_no_driver() {
        let host = NativeHost::default();
        let device = DeviceDescriptor::new("/dev/usblink-does-not-exist", 0x1A86, 0x7523);
        assert!(host.probe_driver(&device).is_none());
        assert!(host.open_device(&device).is_err());
    }

    #[test]
    fn test_driver_exposes_single_port() {
        let mut driver = NativeDriver {
            port: Some(NativePort::new("COM3", Duration::from_millis(50))),
        };
        assert_eq!(driver.port_count(), 1);
        assert!(driver.first_port().is_some());
        assert!(driver.first_port().is_none());
        assert_eq!(driver.port_count(), 0);
    }
}
