//! Host abstraction: the OS primitives the core depends on.
//!
//! The core never talks to the USB subsystem directly. Enumeration,
//! permission prompting, driver probing, device opening and hot-plug
//! notification all go through [`UsbHost`]:
//!
//! - [`NativeHost`] (feature `native`) backs it with the OS serial driver via
//!   the `serialport` crate.
//! - [`MemoryHost`] is an in-memory virtual bus for tests and embedders that
//!   bring their own transport.
//!
//! Asynchronous host callbacks never run session logic inline. A permission
//! decision goes through the [`PermissionResponder`] and a hot-plug event
//! goes through the [`HotplugNotifier`]; both only post a message into the
//! session worker's queue.

pub mod memory;
#[cfg(feature = "native")]
pub mod native;

pub use memory::MemoryHost;
#[cfg(feature = "native")]
pub use native::NativeHost;

use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::hotplug::HotplugNotifier;
use crate::permission::PermissionResponder;
use crate::port::SerialPort;

/// An opened OS device handle.
pub trait DeviceHandle: Send {
    /// Identifier of the device this handle belongs to.
    fn device_id(&self) -> &str;

    /// Release the handle. Must tolerate being called more than once.
    fn close(&mut self) -> Result<()>;
}

/// A serial driver matched to a device by the probing layer.
pub trait SerialDriver: Send {
    /// Number of serial ports the device exposes.
    fn port_count(&self) -> usize;

    /// Take the first exposed port, if any.
    fn first_port(&mut self) -> Option<Box<dyn SerialPort>>;
}

/// OS-level USB primitives.
pub trait UsbHost: Send + Sync {
    /// Enumerate attached USB devices in attachment order.
    fn devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Whether the process already holds access rights to `device`.
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Prompt for access to `device`.
    ///
    /// The host must eventually call [`PermissionResponder::resolve`] from
    /// any thread, or drop the responder if the prompt is abandoned.
    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder);

    /// Match a serial driver to `device`.
    fn probe_driver(&self, device: &DeviceDescriptor) -> Option<Box<dyn SerialDriver>>;

    /// Open the OS device handle.
    fn open_device(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>>;

    /// Subscribe to attach/detach notifications for the lifetime of the
    /// notifier. Called once per session.
    fn watch(&self, notifier: HotplugNotifier) -> Result<()>;
}
